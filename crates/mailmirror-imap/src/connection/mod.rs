//! IMAP connection management.
//!
//! This module provides connection handling for IMAP servers, including:
//! - Configuration (host, port, security mode, timeouts)
//! - TLS/plaintext stream abstraction
//! - Framed I/O with literal handling
//! - Type-state connection wrapper
//! - Time-boxed IDLE
//! - An owned session with reconnect and batched fetch

mod client;
mod config;
mod framed;
mod idle;
mod session;
mod stream;

pub use client::{
    Authenticated, Client, LoggedIn, NotAuthenticated, Selected, xoauth2_initial_response,
};
pub use config::{Config, ConfigBuilder, Security};
pub use framed::FramedStream;
pub use idle::IdleEvent;
pub use session::{Credentials, FetchBatches, Session, SessionConfig};
pub use stream::{ImapStream, tls_connector};
