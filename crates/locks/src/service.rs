//! Per-path bounded locks with TTL and heartbeat
//!
//! A lock admits up to `max_holders` concurrent holders, each with its own
//! expiry. Holders keep locks alive by extending (heartbeating); a holder
//! whose process dies simply stops heartbeating and its slot becomes
//! reclaimable after the TTL. Expired holders are reaped lazily on every
//! read; there is no background sweeper and no notification semantics.
//!
//! `max_holders = 1` behaves as a mutex; `max_holders = N` implements
//! bounded readers.

use chrono::Utc;
use dashmap::DashMap;

/// One admitted holder of a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Caller-chosen holder identity
    pub holder_id: String,
    /// Expiry instant, epoch milliseconds
    pub expires_at: i64,
}

/// Snapshot of a lock's live holder set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// Path the lock guards
    pub path: String,
    /// Live (unexpired) holders
    pub holders: Vec<LockHolder>,
    /// Holder bound the lock was created with
    pub max_holders: usize,
}

#[derive(Debug)]
struct LockState {
    holders: Vec<LockHolder>,
    max_holders: usize,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// In-process distributed-lock table
///
/// Keyed by path; all mutation happens under the per-entry DashMap shard
/// lock, so acquire/extend/release are linearizable per path.
#[derive(Default)]
pub struct LockService {
    locks: DashMap<String, LockState>,
}

impl LockService {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire a slot on `path` for `holder_id`
    ///
    /// Returns true iff the live holder set is below `max_holders`.
    /// Re-acquiring while already held refreshes the holder's TTL. The
    /// first acquirer fixes `max_holders` for the lock's lifetime.
    pub fn acquire(&self, path: &str, holder_id: &str, max_holders: usize, ttl_secs: u64) -> bool {
        let now = now_ms();
        let expires_at = now + (ttl_secs as i64) * 1_000;
        let mut entry = self.locks.entry(path.to_string()).or_insert_with(|| LockState {
            holders: Vec::new(),
            max_holders: max_holders.max(1),
        });
        let state = entry.value_mut();
        state.holders.retain(|h| h.expires_at > now);

        if let Some(existing) = state
            .holders
            .iter_mut()
            .find(|h| h.holder_id == holder_id)
        {
            existing.expires_at = expires_at;
            return true;
        }
        if state.holders.len() >= state.max_holders {
            return false;
        }
        state.holders.push(LockHolder {
            holder_id: holder_id.to_string(),
            expires_at,
        });
        true
    }

    /// Extend a held slot's TTL (heartbeat)
    ///
    /// Returns true iff the holder is present and unexpired. An extend
    /// from a holder whose TTL already lapsed fails: the slot may have
    /// been handed to someone else.
    pub fn extend(&self, path: &str, holder_id: &str, ttl_secs: u64) -> bool {
        let now = now_ms();
        let Some(mut entry) = self.locks.get_mut(path) else {
            return false;
        };
        let state = entry.value_mut();
        state.holders.retain(|h| h.expires_at > now);
        match state.holders.iter_mut().find(|h| h.holder_id == holder_id) {
            Some(holder) => {
                holder.expires_at = now + (ttl_secs as i64) * 1_000;
                true
            }
            None => false,
        }
    }

    /// Release a held slot
    ///
    /// Returns true iff the holder was present (expired or not).
    pub fn release(&self, path: &str, holder_id: &str) -> bool {
        let Some(mut entry) = self.locks.get_mut(path) else {
            return false;
        };
        let state = entry.value_mut();
        let before = state.holders.len();
        state.holders.retain(|h| h.holder_id != holder_id);
        before != state.holders.len()
    }

    /// Drop all holders unconditionally (admin)
    pub fn force_release(&self, path: &str) -> bool {
        self.locks.remove(path).is_some()
    }

    /// Live holder set for a path; None when nothing is held
    pub fn get_info(&self, path: &str) -> Option<LockInfo> {
        let now = now_ms();
        let entry = self.locks.get(path)?;
        let holders: Vec<LockHolder> = entry
            .holders
            .iter()
            .filter(|h| h.expires_at > now)
            .cloned()
            .collect();
        if holders.is_empty() {
            return None;
        }
        Some(LockInfo {
            path: path.to_string(),
            holders,
            max_holders: entry.max_holders,
        })
    }

    /// Active locks whose path starts with `prefix`, up to `limit`
    pub fn list_locks(&self, prefix: &str, limit: usize) -> Vec<LockInfo> {
        let now = now_ms();
        let mut out = Vec::new();
        for entry in self.locks.iter() {
            if out.len() >= limit {
                break;
            }
            if !entry.key().starts_with(prefix) {
                continue;
            }
            let holders: Vec<LockHolder> = entry
                .holders
                .iter()
                .filter(|h| h.expires_at > now)
                .cloned()
                .collect();
            if holders.is_empty() {
                continue;
            }
            out.push(LockInfo {
                path: entry.key().clone(),
                holders,
                max_holders: entry.max_holders,
            });
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_lock_behaves_as_mutex() {
        let svc = LockService::new();
        assert!(svc.acquire("/a", "h1", 1, 30));
        assert!(!svc.acquire("/a", "h2", 1, 30));
        assert!(svc.release("/a", "h1"));
        assert!(svc.acquire("/a", "h2", 1, 30));
    }

    #[test]
    fn test_bounded_holders_admits_exactly_n() {
        let svc = LockService::new();
        assert!(svc.acquire("/a", "h1", 3, 30));
        assert!(svc.acquire("/a", "h2", 3, 30));
        assert!(svc.acquire("/a", "h3", 3, 30));
        assert!(!svc.acquire("/a", "h4", 3, 30));

        svc.release("/a", "h2");
        assert!(svc.acquire("/a", "h4", 3, 30));
    }

    #[test]
    fn test_reacquire_refreshes_not_duplicates() {
        let svc = LockService::new();
        assert!(svc.acquire("/a", "h1", 2, 30));
        assert!(svc.acquire("/a", "h1", 2, 30));
        let info = svc.get_info("/a").unwrap();
        assert_eq!(info.holders.len(), 1);
    }

    #[test]
    fn test_expired_holder_reclaimable() {
        let svc = LockService::new();
        assert!(svc.acquire("/a", "h1", 1, 0)); // expires immediately
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(svc.acquire("/a", "h2", 1, 30));
        let info = svc.get_info("/a").unwrap();
        assert_eq!(info.holders.len(), 1);
        assert_eq!(info.holders[0].holder_id, "h2");
    }

    #[test]
    fn test_extend_fails_after_expiry() {
        let svc = LockService::new();
        assert!(svc.acquire("/a", "h1", 1, 0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!svc.extend("/a", "h1", 30));
    }

    #[test]
    fn test_extend_live_holder() {
        let svc = LockService::new();
        assert!(svc.acquire("/a", "h1", 1, 30));
        assert!(svc.extend("/a", "h1", 60));
        assert!(!svc.extend("/a", "stranger", 60));
    }

    #[test]
    fn test_release_unknown_is_false() {
        let svc = LockService::new();
        assert!(!svc.release("/a", "h1"));
        svc.acquire("/a", "h1", 1, 30);
        assert!(!svc.release("/a", "h2"));
    }

    #[test]
    fn test_force_release() {
        let svc = LockService::new();
        svc.acquire("/a", "h1", 2, 30);
        svc.acquire("/a", "h2", 2, 30);
        assert!(svc.force_release("/a"));
        assert!(svc.get_info("/a").is_none());
        assert!(!svc.force_release("/a"));
    }

    #[test]
    fn test_get_info_filters_expired() {
        let svc = LockService::new();
        svc.acquire("/a", "dead", 2, 0);
        svc.acquire("/a", "live", 2, 30);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let info = svc.get_info("/a").unwrap();
        assert_eq!(info.holders.len(), 1);
        assert_eq!(info.holders[0].holder_id, "live");
    }

    #[test]
    fn test_list_locks_by_prefix() {
        let svc = LockService::new();
        svc.acquire("/ws/a", "h1", 1, 30);
        svc.acquire("/ws/b", "h2", 1, 30);
        svc.acquire("/other", "h3", 1, 30);

        let locks = svc.list_locks("/ws", 10);
        assert_eq!(locks.len(), 2);
        assert_eq!(locks[0].path, "/ws/a");
        assert_eq!(locks[1].path, "/ws/b");
    }
}
