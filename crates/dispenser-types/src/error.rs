//! Error types for payload decoding in dispenser-types.

use thiserror::Error;

/// Errors that can occur when decoding payloads or parsing wire text.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in dispenser-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload bytes are not valid UTF-8 text.
    #[error("Payload is not valid UTF-8 (invalid byte at offset {offset})")]
    Decode {
        /// Byte offset of the first invalid sequence.
        offset: usize,
    },

    /// Text did not match the command grammar.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A command argument or configuration token was not valid.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using dispenser-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
