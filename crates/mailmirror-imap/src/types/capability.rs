//! Server capabilities and completion status.

/// Status keyword of a completion or untagged condition response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// OK
    Ok,
    /// NO
    No,
    /// BAD
    Bad,
    /// PREAUTH
    PreAuth,
    /// BYE
    Bye,
}

impl Status {
    /// Returns true for OK and PREAUTH.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }
}

/// Advertised server capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1`
    Imap4Rev1,
    /// `IMAP4rev2`
    Imap4Rev2,
    /// IDLE (RFC 2177)
    Idle,
    /// UIDPLUS (RFC 4315)
    UidPlus,
    /// STARTTLS
    StartTls,
    /// LOGINDISABLED
    LoginDisabled,
    /// `AUTH=<mechanism>`
    Auth(String),
    /// ENABLE (RFC 5161)
    Enable,
    /// CONDSTORE (RFC 7162)
    CondStore,
    /// SPECIAL-USE (RFC 6154)
    SpecialUse,
    /// LITERAL+ (RFC 7888)
    LiteralPlus,
    /// Gmail extensions: X-GM-MSGID, X-GM-THRID, X-GM-LABELS, X-GM-RAW.
    GmailExt,
    /// Anything else.
    Unknown(String),
}

impl Capability {
    /// Parses a capability atom.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let upper = s.to_ascii_uppercase();
        match upper.as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "IMAP4REV2" => Self::Imap4Rev2,
            "IDLE" => Self::Idle,
            "UIDPLUS" => Self::UidPlus,
            "STARTTLS" => Self::StartTls,
            "LOGINDISABLED" => Self::LoginDisabled,
            "ENABLE" => Self::Enable,
            "CONDSTORE" => Self::CondStore,
            "SPECIAL-USE" => Self::SpecialUse,
            "LITERAL+" => Self::LiteralPlus,
            "X-GM-EXT-1" => Self::GmailExt,
            _ => upper
                .strip_prefix("AUTH=")
                .map_or_else(|| Self::Unknown(s.to_string()), |m| Self::Auth(m.to_string())),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imap4Rev1 => f.write_str("IMAP4rev1"),
            Self::Imap4Rev2 => f.write_str("IMAP4rev2"),
            Self::Idle => f.write_str("IDLE"),
            Self::UidPlus => f.write_str("UIDPLUS"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::LoginDisabled => f.write_str("LOGINDISABLED"),
            Self::Auth(m) => write!(f, "AUTH={m}"),
            Self::Enable => f.write_str("ENABLE"),
            Self::CondStore => f.write_str("CONDSTORE"),
            Self::SpecialUse => f.write_str("SPECIAL-USE"),
            Self::LiteralPlus => f.write_str("LITERAL+"),
            Self::GmailExt => f.write_str("X-GM-EXT-1"),
            Self::Unknown(s) => f.write_str(s),
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
    use super::*;

    #[test]
    fn parses_gmail_and_auth() {
        assert_eq!(Capability::parse("X-GM-EXT-1"), Capability::GmailExt);
        assert_eq!(
            Capability::parse("AUTH=XOAUTH2"),
            Capability::Auth("XOAUTH2".to_string())
        );
        assert_eq!(Capability::parse("condstore"), Capability::CondStore);
        assert_eq!(
            Capability::parse("QUOTA"),
            Capability::Unknown("QUOTA".to_string())
        );
    }

    #[test]
    fn display_round_trips_known_atoms() {
        for atom in ["IDLE", "UIDPLUS", "X-GM-EXT-1", "AUTH=PLAIN"] {
            assert_eq!(Capability::parse(atom).to_string(), atom);
        }
    }

    #[test]
    fn status_ok() {
        assert!(Status::Ok.is_ok());
        assert!(Status::PreAuth.is_ok());
        assert!(!Status::No.is_ok());
    }
}
