//! nexus-locks: distributed lock and revision service
//!
//! Per-path bounded locks with TTL and lazy expiry reaping, buffered
//! heartbeats, per-zone strictly-monotonic revision counters, and the
//! optimistic generation guard used by agent-record transitions.

pub mod heartbeat;
pub mod revision;
pub mod service;

pub use heartbeat::HeartbeatBuffer;
pub use revision::{GenerationGuard, RevisionCounter};
pub use service::{LockHolder, LockInfo, LockService};
