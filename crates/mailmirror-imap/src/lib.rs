//! # mailmirror-imap
//!
//! IMAP client for the mailmirror sync engine. It speaks RFC 3501 plus the
//! extensions a mirror needs: UIDPLUS, CONDSTORE, IDLE and Gmail's X-GM-EXT-1.
//!
//! ## Features
//!
//! - **Type-state connection management**: compile-time enforcement of valid
//!   IMAP state transitions (`NotAuthenticated` → `Authenticated` → `Selected`)
//! - **UID addressing only**: SEARCH, FETCH and STORE always go through the
//!   UID variants
//! - **Batched fetch**: UID lists are split into round-trips by count or by
//!   byte budget, see [`fetch::Budget`]
//! - **Gmail extensions**: X-GM-MSGID, X-GM-THRID, X-GM-LABELS and X-GM-RAW
//! - **TLS via rustls**: secure connections without an OpenSSL dependency
//! - **Sans-I/O parser**: protocol parsing separated from network I/O
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailmirror_imap::{Budget, Config, Credentials, FetchFields, Mailbox, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> mailmirror_imap::Result<()> {
//!     let config = SessionConfig::new(
//!         Config::new("imap.gmail.com"),
//!         Credentials::Password {
//!             username: "user@gmail.com".into(),
//!             password: "app-password".into(),
//!         },
//!     );
//!     let mut session = Session::connect(config).await?;
//!
//!     let status = session.select(&Mailbox::new("[Gmail]/All Mail"), true).await?;
//!     println!("UIDNEXT {}", status.uid_next_or_default());
//!
//!     let uids = session.search(&mailmirror_imap::SearchCriteria::All).await?;
//!     let mut batches = session.fetch_batch(&uids, FetchFields::headers(), &Budget::count(1000));
//!     while let Some(rows) = batches.next().await {
//!         for row in rows? {
//!             println!("{} {:?}", row.uid, row.gm_msgid);
//!         }
//!     }
//!
//!     session.logout().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌─────────────────────┐
//! │   NotAuthenticated  │ ─── login()/authenticate_xoauth2() ───→ Authenticated
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    Authenticated    │ ─── select() ───→ Selected
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │      Selected       │ ─── close() ───→ Authenticated
//! └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`command`]: IMAP command builders and types
//! - [`connection`]: Connection management, type-state client and session
//! - [`fetch`]: Fetch planning and FETCH row decoding
//! - [`parser`]: Sans-I/O response parser
//! - [`types`]: Core IMAP types (flags, mailboxes, UIDs, etc.)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod fetch;
pub mod parser;
pub mod types;

pub use command::{Command, FetchAttribute, SearchCriteria, StoreAction, StoreOp, TagGenerator};
pub use connection::{
    Authenticated, Client, Config, ConfigBuilder, Credentials, FetchBatches, FramedStream,
    IdleEvent, ImapStream, NotAuthenticated, Security, Selected, Session, SessionConfig,
};
pub use error::{Error, Result};
pub use fetch::{Budget, FetchFields, FetchRow};
pub use parser::{Response, ResponseParser, UntaggedResponse};
pub use types::{
    Capability, Flag, Flags, ListResponse, Mailbox, MailboxAttribute, MailboxStatus, ResponseCode,
    SeqNum, Status, Tag, Uid, UidSet, UidValidity,
};
