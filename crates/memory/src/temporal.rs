//! Temporal reference resolution
//!
//! Point-in-time queries accept human and machine forms of "when":
//! `now`, epoch milliseconds, RFC 3339 timestamps, and relative offsets
//! like `-2h` or `-30d`. Everything resolves to epoch milliseconds for
//! the bi-temporal predicate.

use crate::store::MemoryStore;
use nexus_core::{NexusError, Result};
use nexus_records::MemoryRecord;

/// Resolve a time spec to epoch milliseconds
///
/// Accepted forms:
/// - `"now"` (case-insensitive)
/// - integer epoch milliseconds (`"1700000000000"`)
/// - RFC 3339 (`"2024-03-01T12:00:00Z"`)
/// - relative offsets: `-30s`, `-15m`, `-2h`, `-7d` (before `reference`)
pub fn resolve_time_spec(spec: &str, reference_ms: i64) -> Result<i64> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(NexusError::Validation("empty time spec".to_string()));
    }
    if spec.eq_ignore_ascii_case("now") {
        return Ok(reference_ms);
    }
    if let Ok(ms) = spec.parse::<i64>() {
        return Ok(ms);
    }
    if let Some(offset_ms) = parse_relative(spec) {
        return Ok(reference_ms.saturating_add(offset_ms));
    }
    match chrono::DateTime::parse_from_rfc3339(spec) {
        Ok(dt) => Ok(dt.timestamp_millis()),
        Err(e) => Err(NexusError::Validation(format!(
            "unrecognized time spec {spec:?}: {e}"
        ))),
    }
}

/// Parse `-2h` / `+30m` style offsets into signed milliseconds
fn parse_relative(spec: &str) -> Option<i64> {
    let (sign, rest) = match spec.as_bytes().first()? {
        b'-' => (-1i64, &spec[1..]),
        b'+' => (1i64, &spec[1..]),
        _ => return None,
    };
    if rest.len() < 2 {
        return None;
    }
    let (number, unit) = rest.split_at(rest.len() - 1);
    let value: i64 = number.parse().ok()?;
    let unit_ms = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    Some(sign * value.saturating_mul(unit_ms))
}

/// Point-in-time view over a memory store
pub struct TemporalResolver {
    store: MemoryStore,
}

impl TemporalResolver {
    /// Wrap a memory store
    pub fn new(store: MemoryStore) -> Self {
        TemporalResolver { store }
    }

    /// A user's memories as they were valid at the spec'd instant
    pub fn memories_at(&self, user_id: &str, spec: &str) -> Result<Vec<MemoryRecord>> {
        let reference = nexus_records::now_ms();
        let at = resolve_time_spec(spec, reference)?;
        if at >= reference {
            // "now" and future instants read the current view
            self.store.list_for_user(user_id)
        } else {
            self.store.list_as_of(user_id, at)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryInput;
    use nexus_records::RecordStore;
    use std::sync::Arc;

    const REF: i64 = 1_700_000_000_000;

    #[test]
    fn test_resolve_now() {
        assert_eq!(resolve_time_spec("now", REF).unwrap(), REF);
        assert_eq!(resolve_time_spec("NOW", REF).unwrap(), REF);
        assert_eq!(resolve_time_spec("  now  ", REF).unwrap(), REF);
    }

    #[test]
    fn test_resolve_epoch_millis() {
        assert_eq!(
            resolve_time_spec("1690000000000", REF).unwrap(),
            1_690_000_000_000
        );
    }

    #[test]
    fn test_resolve_relative_offsets() {
        assert_eq!(resolve_time_spec("-30s", REF).unwrap(), REF - 30_000);
        assert_eq!(resolve_time_spec("-15m", REF).unwrap(), REF - 900_000);
        assert_eq!(resolve_time_spec("-2h", REF).unwrap(), REF - 7_200_000);
        assert_eq!(resolve_time_spec("-7d", REF).unwrap(), REF - 604_800_000);
        assert_eq!(resolve_time_spec("+1h", REF).unwrap(), REF + 3_600_000);
    }

    #[test]
    fn test_resolve_rfc3339() {
        let ms = resolve_time_spec("2024-03-01T12:00:00Z", REF).unwrap();
        assert_eq!(ms, 1_709_294_400_000);
        // Offset forms resolve too
        let with_offset = resolve_time_spec("2024-03-01T13:00:00+01:00", REF).unwrap();
        assert_eq!(with_offset, ms);
    }

    #[test]
    fn test_resolve_garbage_rejected() {
        assert!(resolve_time_spec("", REF).is_err());
        assert!(resolve_time_spec("yesterday-ish", REF).is_err());
        assert!(resolve_time_spec("-2y", REF).is_err());
        assert!(resolve_time_spec("-h", REF).is_err());
    }

    #[test]
    fn test_memories_at_relative_spec() {
        let store = MemoryStore::new(Arc::new(RecordStore::open_in_memory().unwrap()));
        let mut old = MemoryInput::new("h1", "u1").with_path_key("k1");
        old.valid_at = Some(1_000);
        let old = store.create(old).unwrap();
        store
            .create(MemoryInput::new("h2", "u1").with_path_key("k1"))
            .unwrap();

        let resolver = TemporalResolver::new(store);
        // "now" sees the replacement
        let current = resolver.memories_at("u1", "now").unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].content_hash, "h2");

        // An absolute instant between the two sees the original
        let historical = resolver.memories_at("u1", "2000").unwrap();
        assert_eq!(historical.len(), 1);
        assert_eq!(historical[0].memory_id, old.memory_id);
    }
}
