//! Core protocol types.
//!
//! Identifiers, flags, mailbox data and response codes shared by the parser,
//! the command builder and the client.

#![allow(clippy::missing_const_for_fn)]

mod capability;
mod flags;
mod identifiers;
mod mailbox;
mod response_code;
mod uid_set;

pub use capability::{Capability, Status};
pub use flags::{Flag, Flags};
pub use identifiers::{SeqNum, Tag, Uid, UidValidity};
pub use mailbox::{ListResponse, Mailbox, MailboxAttribute, MailboxStatus};
pub use response_code::ResponseCode;
pub use uid_set::{UidRange, UidSet};
