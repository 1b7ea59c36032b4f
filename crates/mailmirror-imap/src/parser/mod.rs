//! Sans-I/O response parser.
//!
//! The [`lexer`] splits a response into tokens and [`response`] builds typed
//! values from them. Neither touches the network, so every grammar rule is
//! testable from byte strings.
//!
//! ```
//! use mailmirror_imap::parser::{Response, ResponseParser, UntaggedResponse};
//!
//! let response = ResponseParser::parse(b"* 3 EXISTS\r\n").unwrap();
//! assert_eq!(response, Response::Untagged(UntaggedResponse::Exists(3)));
//! ```

pub mod lexer;
pub mod response;

pub use lexer::{Lexer, Token};
pub use response::{FetchItem, Response, ResponseParser, StatusItem, UntaggedResponse};
