//! Commands the mirror sends.
//!
//! Everything message-addressed goes through the UID variants; sequence numbers
//! shift under concurrent expunges and are never used for addressing.

mod serialize;
mod tag_generator;
mod types;

use crate::types::{Flag, Mailbox, UidSet};

pub use tag_generator::TagGenerator;
pub use types::{FetchAttribute, SearchCriteria, StoreAction, StoreOp};

use serialize::{
    write_astring, write_fetch_items, write_mailbox, write_search_criteria, write_store_action,
};

/// IMAP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY
    Capability,
    /// NOOP
    Noop,
    /// LOGOUT
    Logout,
    /// LOGIN
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// AUTHENTICATE with an optional SASL-IR initial response.
    Authenticate {
        /// SASL mechanism.
        mechanism: String,
        /// Base64 initial response.
        initial_response: Option<String>,
    },
    /// ENABLE
    Enable {
        /// Extensions to enable.
        capabilities: Vec<String>,
    },
    /// SELECT
    Select {
        /// Mailbox.
        mailbox: Mailbox,
        /// Request CONDSTORE.
        condstore: bool,
    },
    /// EXAMINE
    Examine {
        /// Mailbox.
        mailbox: Mailbox,
        /// Request CONDSTORE.
        condstore: bool,
    },
    /// LIST
    List {
        /// Reference name.
        reference: String,
        /// Pattern.
        pattern: String,
    },
    /// `STATUS mailbox (UIDNEXT UIDVALIDITY)`
    Status {
        /// Mailbox.
        mailbox: Mailbox,
    },
    /// APPEND header line. The literal itself follows after the continuation.
    Append {
        /// Target mailbox.
        mailbox: Mailbox,
        /// Initial flags.
        flags: Vec<Flag>,
        /// INTERNALDATE, `dd-Mon-yyyy hh:mm:ss +zzzz`.
        internal_date: Option<String>,
        /// Literal length in bytes.
        size: usize,
    },
    /// UID SEARCH
    UidSearch {
        /// Criteria.
        criteria: SearchCriteria,
    },
    /// UID FETCH
    UidFetch {
        /// UIDs.
        uids: UidSet,
        /// Items.
        items: Vec<FetchAttribute>,
        /// `(CHANGEDSINCE n)` modifier.
        changed_since: Option<u64>,
    },
    /// UID STORE
    UidStore {
        /// UIDs.
        uids: UidSet,
        /// Change to apply.
        action: StoreAction,
        /// Suppress the untagged FETCH echo.
        silent: bool,
    },
    /// IDLE
    Idle,
    /// DONE, ends IDLE. Sent without a tag.
    Done,
    /// CLOSE
    Close,
}

impl Command {
    /// Serializes the command with the given tag.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);

        if !matches!(self, Self::Done) {
            buf.extend_from_slice(tag.as_bytes());
            buf.push(b' ');
        }

        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::Noop => buf.extend_from_slice(b"NOOP"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::Idle => buf.extend_from_slice(b"IDLE"),
            Self::Done => buf.extend_from_slice(b"DONE"),
            Self::Close => buf.extend_from_slice(b"CLOSE"),

            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }

            Self::Authenticate {
                mechanism,
                initial_response,
            } => {
                buf.extend_from_slice(b"AUTHENTICATE ");
                buf.extend_from_slice(mechanism.as_bytes());
                if let Some(resp) = initial_response {
                    buf.push(b' ');
                    buf.extend_from_slice(resp.as_bytes());
                }
            }

            Self::Enable { capabilities } => {
                buf.extend_from_slice(b"ENABLE");
                for cap in capabilities {
                    buf.push(b' ');
                    buf.extend_from_slice(cap.as_bytes());
                }
            }

            Self::Select { mailbox, condstore } | Self::Examine { mailbox, condstore } => {
                let verb: &[u8] = if matches!(self, Self::Select { .. }) {
                    b"SELECT "
                } else {
                    b"EXAMINE "
                };
                buf.extend_from_slice(verb);
                write_mailbox(&mut buf, mailbox);
                if *condstore {
                    buf.extend_from_slice(b" (CONDSTORE)");
                }
            }

            Self::List { reference, pattern } => {
                buf.extend_from_slice(b"LIST ");
                write_astring(&mut buf, reference);
                buf.push(b' ');
                write_astring(&mut buf, pattern);
            }

            Self::Status { mailbox } => {
                buf.extend_from_slice(b"STATUS ");
                write_mailbox(&mut buf, mailbox);
                buf.extend_from_slice(b" (UIDNEXT UIDVALIDITY)");
            }

            Self::Append {
                mailbox,
                flags,
                internal_date,
                size,
            } => {
                buf.extend_from_slice(b"APPEND ");
                write_mailbox(&mut buf, mailbox);
                if !flags.is_empty() {
                    buf.extend_from_slice(b" (");
                    let names: Vec<&str> = flags.iter().map(Flag::as_str).collect();
                    buf.extend_from_slice(names.join(" ").as_bytes());
                    buf.push(b')');
                }
                if let Some(date) = internal_date {
                    buf.extend_from_slice(format!(" \"{date}\"").as_bytes());
                }
                buf.extend_from_slice(format!(" {{{size}}}").as_bytes());
            }

            Self::UidSearch { criteria } => {
                buf.extend_from_slice(b"UID SEARCH ");
                write_search_criteria(&mut buf, criteria);
            }

            Self::UidFetch {
                uids,
                items,
                changed_since,
            } => {
                buf.extend_from_slice(b"UID FETCH ");
                buf.extend_from_slice(uids.to_string().as_bytes());
                buf.push(b' ');
                write_fetch_items(&mut buf, items);
                if let Some(modseq) = changed_since {
                    buf.extend_from_slice(format!(" (CHANGEDSINCE {modseq})").as_bytes());
                }
            }

            Self::UidStore {
                uids,
                action,
                silent,
            } => {
                buf.extend_from_slice(b"UID STORE ");
                buf.extend_from_slice(uids.to_string().as_bytes());
                buf.push(b' ');
                write_store_action(&mut buf, action, *silent);
            }
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Name for logs. Never includes arguments, so credentials stay out of traces.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
            Self::Login { .. } => "LOGIN",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Enable { .. } => "ENABLE",
            Self::Select { .. } => "SELECT",
            Self::Examine { .. } => "EXAMINE",
            Self::List { .. } => "LIST",
            Self::Status { .. } => "STATUS",
            Self::Append { .. } => "APPEND",
            Self::UidSearch { .. } => "UID SEARCH",
            Self::UidFetch { .. } => "UID FETCH",
            Self::UidStore { .. } => "UID STORE",
            Self::Idle => "IDLE",
            Self::Done => "DONE",
            Self::Close => "CLOSE",
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use crate::types::Uid;

    use super::*;

    fn uids(list: &[u32]) -> UidSet {
        let v: Vec<Uid> = list.iter().map(|n| Uid::new(*n).unwrap()).collect();
        UidSet::from_uids(&v)
    }

    fn wire(cmd: &Command) -> String {
        String::from_utf8(cmd.serialize("M0001")).unwrap()
    }

    #[test]
    fn login_quotes_when_needed() {
        let cmd = Command::Login {
            username: "me@example.com".to_string(),
            password: "p\"w d".to_string(),
        };
        assert_eq!(wire(&cmd), "M0001 LOGIN me@example.com \"p\\\"w d\"\r\n");
    }

    #[test]
    fn examine_with_condstore() {
        let cmd = Command::Examine {
            mailbox: Mailbox::new("[Gmail]/All Mail"),
            condstore: true,
        };
        assert_eq!(
            wire(&cmd),
            "M0001 EXAMINE \"[Gmail]/All Mail\" (CONDSTORE)\r\n"
        );
    }

    #[test]
    fn list_everything() {
        let cmd = Command::List {
            reference: String::new(),
            pattern: "*".to_string(),
        };
        assert_eq!(wire(&cmd), "M0001 LIST \"\" \"*\"\r\n");
    }

    #[test]
    fn uid_fetch_headers_with_gmail_items() {
        let cmd = Command::UidFetch {
            uids: uids(&[1, 2, 3, 7]),
            items: vec![
                FetchAttribute::Uid,
                FetchAttribute::Flags,
                FetchAttribute::GmMsgId,
                FetchAttribute::BodyPeek("HEADER".to_string()),
            ],
            changed_since: None,
        };
        assert_eq!(
            wire(&cmd),
            "M0001 UID FETCH 1:3,7 (UID FLAGS X-GM-MSGID BODY.PEEK[HEADER])\r\n"
        );
    }

    #[test]
    fn uid_fetch_changed_since() {
        let cmd = Command::UidFetch {
            uids: UidSet::all(),
            items: vec![FetchAttribute::Flags],
            changed_since: Some(12345),
        };
        assert_eq!(
            wire(&cmd),
            "M0001 UID FETCH 1:* FLAGS (CHANGEDSINCE 12345)\r\n"
        );
    }

    #[test]
    fn uid_store_flags_and_labels() {
        let cmd = Command::UidStore {
            uids: uids(&[42]),
            action: StoreAction::Flags(StoreOp::Add, vec![Flag::Seen]),
            silent: true,
        };
        assert_eq!(wire(&cmd), "M0001 UID STORE 42 +FLAGS.SILENT (\\Seen)\r\n");

        let cmd = Command::UidStore {
            uids: uids(&[5, 6]),
            action: StoreAction::Labels(StoreOp::Remove, vec!["My Label".to_string()]),
            silent: false,
        };
        assert_eq!(
            wire(&cmd),
            "M0001 UID STORE 5:6 -X-GM-LABELS (\"My Label\")\r\n"
        );
    }

    #[test]
    fn uid_search_criteria() {
        let cmd = Command::UidSearch {
            criteria: SearchCriteria::UidFrom(Uid::new(100).unwrap()),
        };
        assert_eq!(wire(&cmd), "M0001 UID SEARCH UID 100:*\r\n");

        let cmd = Command::UidSearch {
            criteria: SearchCriteria::And(vec![
                SearchCriteria::Header("Message-ID".to_string(), "<a@b>".to_string()),
                SearchCriteria::Not(Box::new(SearchCriteria::GmRaw("in:trash".to_string()))),
            ]),
        };
        assert_eq!(
            wire(&cmd),
            "M0001 UID SEARCH HEADER Message-ID <a@b> NOT X-GM-RAW \"in:trash\"\r\n"
        );
    }

    #[test]
    fn append_announces_literal() {
        let cmd = Command::Append {
            mailbox: Mailbox::inbox(),
            flags: vec![Flag::Seen, Flag::Draft],
            internal_date: Some("17-Jul-1996 02:44:25 -0700".to_string()),
            size: 310,
        };
        assert_eq!(
            wire(&cmd),
            "M0001 APPEND INBOX (\\Seen \\Draft) \"17-Jul-1996 02:44:25 -0700\" {310}\r\n"
        );
    }

    #[test]
    fn done_has_no_tag() {
        assert_eq!(Command::Done.serialize("M0009"), b"DONE\r\n");
    }

    #[test]
    fn name_hides_credentials() {
        let cmd = Command::Login {
            username: "u".into(),
            password: "secret".into(),
        };
        assert_eq!(cmd.name(), "LOGIN");
    }
}
