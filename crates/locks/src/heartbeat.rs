//! Buffered heartbeat flushing
//!
//! Lock holders heartbeat frequently; flushing each beat straight through
//! would hammer the lock table. Beats are buffered in-process and flushed
//! either on interval (driven by the caller) or when the buffer fills:
//! warn-log at 80% of `max_buffer_size`, forced flush at 100%.

use crate::service::LockService;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One pending heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Beat {
    path: String,
    holder_id: String,
}

/// In-process heartbeat buffer in front of a [`LockService`]
pub struct HeartbeatBuffer {
    locks: Arc<LockService>,
    pending: Mutex<HashMap<Beat, u64>>,
    max_buffer_size: usize,
}

impl HeartbeatBuffer {
    /// Create a buffer flushing into the given lock service
    pub fn new(locks: Arc<LockService>, max_buffer_size: usize) -> Self {
        HeartbeatBuffer {
            locks,
            pending: Mutex::new(HashMap::new()),
            max_buffer_size: max_buffer_size.max(1),
        }
    }

    /// Record a heartbeat; duplicate beats for the same holder coalesce
    ///
    /// Returns the number of flushed extensions when the buffer hit its
    /// capacity and force-flushed, 0 otherwise.
    pub fn beat(&self, path: &str, holder_id: &str, ttl_secs: u64) -> usize {
        let should_flush = {
            let mut pending = self.pending.lock();
            pending.insert(
                Beat {
                    path: path.to_string(),
                    holder_id: holder_id.to_string(),
                },
                ttl_secs,
            );
            let len = pending.len();
            if len * 10 >= self.max_buffer_size * 8 && len < self.max_buffer_size {
                warn!(
                    buffered = len,
                    capacity = self.max_buffer_size,
                    "heartbeat buffer above 80% of capacity"
                );
            }
            len >= self.max_buffer_size
        };
        if should_flush {
            self.flush()
        } else {
            0
        }
    }

    /// Flush all pending beats into the lock service
    ///
    /// Returns how many extensions were applied. Beats for holders that
    /// have already expired are dropped silently; the next heartbeat from
    /// such a holder will fail loudly at acquire time.
    pub fn flush(&self) -> usize {
        let drained: HashMap<Beat, u64> = std::mem::take(&mut *self.pending.lock());
        let mut applied = 0;
        for (beat, ttl_secs) in drained {
            if self.locks.extend(&beat.path, &beat.holder_id, ttl_secs) {
                applied += 1;
            }
        }
        applied
    }

    /// Number of beats waiting to flush
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
