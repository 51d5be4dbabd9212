//! Text payload codec.
//!
//! The firmware exchanges plain UTF-8 text: commands are written as-is,
//! notifications carry a single textual value and the history buffer holds
//! comma-separated decimal numbers, oldest first.

use bytes::Bytes;

use crate::error::{ParseError, ParseResult};

/// Encode command text as a transport payload.
#[must_use]
pub fn encode_command(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

/// Decode a transport payload into text.
///
/// Trailing NUL padding is stripped. Malformed UTF-8 is reported as
/// [`ParseError::Decode`].
pub fn decode_payload(payload: &[u8]) -> ParseResult<String> {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);

    std::str::from_utf8(&payload[..end])
        .map(str::to_owned)
        .map_err(|e| ParseError::Decode {
            offset: e.valid_up_to(),
        })
}

/// Parse a comma-separated list of samples.
///
/// Tokens are trimmed. A token that is not a finite number becomes `0.0`, so
/// the output always has one entry per token. Empty or blank input yields no
/// samples.
#[must_use]
pub fn parse_sample_list(text: &str) -> Vec<f64> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    text.split(',')
        .map(|token| {
            token
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
        })
        .collect()
}
