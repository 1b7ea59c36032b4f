//! Response data types.

use crate::types::{Capability, Flags, ListResponse, Mailbox, ResponseCode, SeqNum, Uid, UidValidity};

/// One data item of a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// FLAGS
    Flags(Flags),
    /// INTERNALDATE, unparsed.
    InternalDate(String),
    /// RFC822.SIZE
    Rfc822Size(u32),
    /// UID
    Uid(Uid),
    /// BODY[...], RFC822, RFC822.HEADER or RFC822.TEXT.
    Body {
        /// Section text between the brackets, upper-cased. `None` for `RFC822`.
        section: Option<String>,
        /// Payload, `None` for NIL.
        data: Option<Vec<u8>>,
    },
    /// MODSEQ (CONDSTORE).
    ModSeq(u64),
    /// X-GM-MSGID
    GmMsgId(u64),
    /// X-GM-THRID
    GmThrId(u64),
    /// X-GM-LABELS, with quoting removed.
    GmLabels(Vec<String>),
}

/// One item of a STATUS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusItem {
    /// MESSAGES
    Messages(u32),
    /// UIDNEXT
    UidNext(Uid),
    /// UIDVALIDITY
    UidValidity(UidValidity),
    /// UNSEEN
    Unseen(u32),
    /// HIGHESTMODSEQ
    HighestModSeq(u64),
}

/// Untagged server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// `* OK`
    Ok {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Trailing text.
        text: String,
    },
    /// `* NO`
    No {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Trailing text.
        text: String,
    },
    /// `* BAD`
    Bad {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Trailing text.
        text: String,
    },
    /// `* PREAUTH`
    PreAuth {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Trailing text.
        text: String,
    },
    /// `* BYE`
    Bye {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Trailing text.
        text: String,
    },
    /// `* CAPABILITY`
    Capability(Vec<Capability>),
    /// `* LIST`
    List(ListResponse),
    /// `* FLAGS`
    Flags(Flags),
    /// `* n EXISTS`
    Exists(u32),
    /// `* n RECENT`
    Recent(u32),
    /// `* n EXPUNGE`
    Expunge(SeqNum),
    /// `* n FETCH (...)`
    Fetch {
        /// Sequence number of the message.
        seq: SeqNum,
        /// Data items in server order.
        items: Vec<FetchItem>,
    },
    /// `* SEARCH`; UIDs when the command was UID SEARCH.
    Search(Vec<u32>),
    /// `* STATUS`
    Status {
        /// Mailbox the status belongs to.
        mailbox: Mailbox,
        /// Requested items.
        items: Vec<StatusItem>,
    },
    /// `* ENABLED`
    Enabled(Vec<Capability>),
}
