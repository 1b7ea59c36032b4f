//! # mailmirror-mime
//!
//! Tolerant message codec for the mirror.
//!
//! ## Features
//!
//! - **Parsing**: headers, addresses, MIME tree, attachments and a text preview
//!   in one [`ParsedMessage`]
//! - **Charset fallback**: declared charset, UTF-8, charsets seen elsewhere in
//!   the message, then windows-1252; decoding never fails
//! - **RFC 2047**: encoded words in headers go through the same fallback chain
//! - **Synthetic headers**: provenance fields (`X-SHA256`, `X-GM-MSGID`, ...)
//!   written in front of stored messages and read back
//! - **Thread links**: zero-body messages that join threads
//!
//! ## Quick Start
//!
//! ```
//! use std::collections::HashMap;
//! use mailmirror_mime::{ParsedMessage, SyntheticHeaders, content_hash};
//!
//! let raw = b"Message-Id: <101@mlr>\r\nSubject: hello\r\n\r\nbody\r\n";
//! let msg = ParsedMessage::parse(raw, 1, None, &HashMap::new()).unwrap();
//! assert_eq!(msg.subject, "hello");
//!
//! let stored = SyntheticHeaders {
//!     sha256: Some(content_hash(raw)),
//!     uid: Some(1),
//!     ..SyntheticHeaders::default()
//! }
//! .serialize(raw);
//! assert_eq!(SyntheticHeaders::from_message(&stored).unwrap().uid, Some(1));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
pub mod charset;
mod content_type;
pub mod encoding;
mod error;
mod header;
mod message;
mod parsed;
pub mod synthetic;

pub use address::{Address, parse_addresses};
pub use content_type::{ContentType, Disposition};
pub use error::{Error, Result};
pub use header::{Headers, split_message};
pub use message::{Part, TransferEncoding};
pub use parsed::{
    Attachment, INTERNAL_DATE_FORMAT, NO_MESSAGE_ID, PREVIEW_CHARS, ParsedMessage,
    embedded_message_id, parse_internal_date,
};
pub use synthetic::{
    SyntheticHeaders, build_link_message, content_hash, dup_message_id, generate_message_id,
};
