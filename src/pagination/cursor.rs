//! Opaque position cursors.
//!
//! A cursor encodes the absolute position of an item in an ordered result
//! set. Against an unchanged data set, decoding a cursor selects the same
//! start point on every re-query.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::{Error, Result};

const PREFIX: &str = "position:";

pub fn encode_cursor(position: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{PREFIX}{position}"))
}

pub fn decode_cursor(cursor: &str) -> Result<usize> {
    let malformed = || Error::InvalidInput(format!("malformed cursor '{cursor}'"));
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| malformed())?;
    let text = String::from_utf8(bytes).map_err(|_| malformed())?;
    text.strip_prefix(PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(malformed)
}

/// Offset of the first item after the one the cursor points at.
pub fn offset_after(cursor: &str) -> Result<usize> {
    decode_cursor(cursor).map(|p| p.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_roundtrip() {
        for position in [0, 1, 24, 25, 9_999] {
            assert_eq!(decode_cursor(&encode_cursor(position)).unwrap(), position);
        }
    }

    #[test]
    fn test_cursor_is_opaque() {
        let cursor = encode_cursor(42);
        assert!(!cursor.contains("42"));
    }

    #[test]
    fn test_malformed_cursor() {
        assert!(matches!(decode_cursor("%%%"), Err(Error::InvalidInput(_))));
        let foreign = URL_SAFE_NO_PAD.encode("offset=3");
        assert!(matches!(decode_cursor(&foreign), Err(Error::InvalidInput(_))));
    }
}
