//! Keyset pagination cursors
//!
//! A cursor carries the last path returned plus the filter set it was
//! issued for. Decoding refuses cursors whose filters differ from the
//! current call, so a client cannot splice a cursor from one listing into
//! another and silently skip or duplicate rows.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use nexus_core::{NexusError, Result};
use serde::{Deserialize, Serialize};

/// Filter set a listing ran with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilters {
    /// Path prefix restriction
    pub prefix: String,
    /// Whether nested files were included
    pub recursive: bool,
    /// Zone restriction, if any
    pub zone_id: Option<String>,
}

/// Decoded cursor payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last `virtual_path` of the previous page
    pub last_path: String,
    /// Filters the cursor was issued under
    pub filters: ListFilters,
}

/// Encode a cursor to its opaque form
pub fn encode_cursor(cursor: &Cursor) -> Result<String> {
    let payload = bincode::serialize(cursor)?;
    Ok(URL_SAFE_NO_PAD.encode(payload))
}

/// Decode a cursor, verifying its filters match the current call
pub fn decode_cursor(encoded: &str, expected: &ListFilters) -> Result<Cursor> {
    let payload = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| NexusError::InvalidCursor(format!("bad base64: {e}")))?;
    let cursor: Cursor = bincode::deserialize(&payload)
        .map_err(|e| NexusError::InvalidCursor(format!("bad payload: {e}")))?;
    if &cursor.filters != expected {
        return Err(NexusError::InvalidCursor(
            "cursor filters do not match this call".to_string(),
        ));
    }
    Ok(cursor)
}

/// One page of a paginated listing
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    /// Rows in this page, in listing order
    pub items: Vec<T>,
    /// Cursor for the next page, when more rows remain
    pub next_cursor: Option<String>,
    /// Whether more rows remain past this page
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> ListFilters {
        ListFilters {
            prefix: "/workspace".to_string(),
            recursive: true,
            zone_id: Some("default".to_string()),
        }
    }

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = Cursor {
            last_path: "/workspace/m.txt".to_string(),
            filters: filters(),
        };
        let encoded = encode_cursor(&cursor).unwrap();
        let decoded = decode_cursor(&encoded, &filters()).unwrap();
        assert_eq!(decoded, cursor);
        // Re-encoding yields the same cursor
        assert_eq!(encode_cursor(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_cursor_filter_mismatch_rejected() {
        let cursor = Cursor {
            last_path: "/workspace/m.txt".to_string(),
            filters: filters(),
        };
        let encoded = encode_cursor(&cursor).unwrap();

        let mut other = filters();
        other.prefix = "/secret".to_string();
        let err = decode_cursor(&encoded, &other).unwrap_err();
        assert!(matches!(err, NexusError::InvalidCursor(_)));

        let mut other = filters();
        other.recursive = false;
        assert!(decode_cursor(&encoded, &other).is_err());

        let mut other = filters();
        other.zone_id = None;
        assert!(decode_cursor(&encoded, &other).is_err());
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        assert!(decode_cursor("!!!", &filters()).is_err());
        assert!(decode_cursor("", &filters()).is_err());
    }
}
