//! Bracketed response codes.

use super::{Capability, Flag, Uid, UidValidity};

/// Response code carried in `[...]` after a status keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// ALERT
    Alert,
    /// CAPABILITY list sent inline.
    Capability(Vec<Capability>),
    /// PERMANENTFLAGS
    PermanentFlags(Vec<Flag>),
    /// READ-ONLY
    ReadOnly,
    /// READ-WRITE
    ReadWrite,
    /// TRYCREATE
    TryCreate,
    /// UIDNEXT
    UidNext(Uid),
    /// UIDVALIDITY
    UidValidity(UidValidity),
    /// UNSEEN
    Unseen(u32),
    /// APPENDUID (UIDPLUS).
    AppendUid {
        /// Epoch of the target mailbox.
        uidvalidity: UidValidity,
        /// UID given to the appended message.
        uid: Uid,
    },
    /// HIGHESTMODSEQ (CONDSTORE).
    HighestModSeq(u64),
    /// NOMODSEQ
    NoModSeq,
    /// AUTHENTICATIONFAILED
    AuthenticationFailed,
    /// Anything else, by name.
    Unknown(String),
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
    fn append_uid_carries_both_values() {
        let code = ResponseCode::AppendUid {
            uidvalidity: UidValidity::new(38505).unwrap(),
            uid: Uid::new(3955).unwrap(),
        };
        let ResponseCode::AppendUid { uidvalidity, uid } = code else {
            panic!("expected APPENDUID");
        };
        assert_eq!(uidvalidity.get(), 38505);
        assert_eq!(uid.get(), 3955);
    }
}
