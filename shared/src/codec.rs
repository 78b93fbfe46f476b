//! Hex command codec
//!
//! Commands are typed by the operator (or bound to UI buttons) as hex digit
//! strings and go out on the wire as raw bytes, one byte per digit pair:
//! ```text
//! "0A03"  ->  [ 0x0A ][ 0x03 ]
//! ```
//!
//! There is no framing: the payload is exactly the decoded bytes.

use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while encoding a command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Malformed hex command {input:?}: {source}")]
    MalformedInput {
        input: String,
        #[source]
        source: hex::FromHexError,
    },
}

/// Convert a hex string into the raw payload sent to the device
///
/// Upper and lower case digits are both accepted. Odd-length input or any
/// non-hex character is rejected instead of producing a corrupted byte.
pub fn encode(hex_str: &str) -> Result<Bytes, CodecError> {
    hex::decode(hex_str)
        .map(Bytes::from)
        .map_err(|source| CodecError::MalformedInput {
            input: hex_str.to_owned(),
            source,
        })
}

/// Render a payload as uppercase hex (for logs and the simulator)
pub fn to_hex(payload: &[u8]) -> String {
    hex::encode_upper(payload)
}
