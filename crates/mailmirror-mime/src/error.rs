//! Error types for message decoding.
//!
//! Charset trouble is never an error here: bodies and headers always decode to
//! something, and the problem is recorded in [`ParsedMessage::errors`].
//!
//! [`ParsedMessage::errors`]: crate::ParsedMessage::errors

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Codec error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Header that cannot be read back.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Malformed transfer or encoded-word encoding.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Input is not a message at all.
    #[error("Parse error: {0}")]
    Parse(String),
}
