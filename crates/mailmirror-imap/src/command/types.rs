//! Command arguments.

use crate::types::{Flag, Uid, UidSet};

/// Items requested by UID FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// UID
    Uid,
    /// FLAGS
    Flags,
    /// INTERNALDATE
    InternalDate,
    /// RFC822.SIZE
    Rfc822Size,
    /// `BODY.PEEK[section]`; empty section fetches the whole message.
    BodyPeek(String),
    /// MODSEQ
    ModSeq,
    /// X-GM-MSGID
    GmMsgId,
    /// X-GM-THRID
    GmThrId,
    /// X-GM-LABELS
    GmLabels,
}

impl FetchAttribute {
    /// Wire form.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Uid => "UID".to_string(),
            Self::Flags => "FLAGS".to_string(),
            Self::InternalDate => "INTERNALDATE".to_string(),
            Self::Rfc822Size => "RFC822.SIZE".to_string(),
            Self::BodyPeek(section) => format!("BODY.PEEK[{section}]"),
            Self::ModSeq => "MODSEQ".to_string(),
            Self::GmMsgId => "X-GM-MSGID".to_string(),
            Self::GmThrId => "X-GM-THRID".to_string(),
            Self::GmLabels => "X-GM-LABELS".to_string(),
        }
    }
}

/// How a STORE changes the target set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `+`
    Add,
    /// `-`
    Remove,
    /// Replace the whole set.
    Replace,
}

impl StoreOp {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Remove => "-",
            Self::Replace => "",
        }
    }
}

/// STORE data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// `[+-]FLAGS (...)`
    Flags(StoreOp, Vec<Flag>),
    /// `[+-]X-GM-LABELS (...)`
    Labels(StoreOp, Vec<String>),
}

impl StoreAction {
    pub(crate) fn item_name(&self, silent: bool) -> String {
        let (op, name) = match self {
            Self::Flags(op, _) => (op, "FLAGS"),
            Self::Labels(op, _) => (op, "X-GM-LABELS"),
        };
        format!(
            "{}{name}{}",
            op.prefix(),
            if silent { ".SILENT" } else { "" }
        )
    }
}

/// UID SEARCH criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// ALL
    All,
    /// `UID n:*`
    UidFrom(Uid),
    /// `UID set`
    Uids(UidSet),
    /// `HEADER name value`
    Header(String, String),
    /// `MODSEQ n` (CONDSTORE)
    ModSeqAbove(u64),
    /// `X-GM-RAW "query"`
    GmRaw(String),
    /// `NOT c`
    Not(Box<Self>),
    /// Space-joined conjunction.
    And(Vec<Self>),
}
