// Transport codec — reversible Base64 framing for the text-oriented
// characteristic write/notify path.
//
// The radio transport carries text, not raw bytes. Everything written to or
// received from the exchange characteristic passes through this module.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Errors for codec operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),
}

/// Encode raw payload bytes into transport-safe text.
///
/// Empty input encodes to the empty string.
pub fn encode(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Decode transport text back into raw payload bytes.
///
/// Fails with [`CodecError::MalformedEncoding`] when the input contains
/// characters outside the Base64 alphabet or carries invalid padding.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(text)
        .map_err(|err| CodecError::MalformedEncoding(err.to_string()))
}
