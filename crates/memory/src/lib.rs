//! nexus-memory: bi-temporal memory core
//!
//! Append-only memory rows with supersession chains and point-in-time
//! reads, plus the affinity-based consolidation engine that compacts
//! low-importance memories behind a summarizer port.

pub mod affinity;
pub mod consolidation;
pub mod store;
pub mod temporal;

pub use affinity::{affinity, cluster_by_affinity, cosine, AffinityItem};
pub use consolidation::{
    ConcatSummarizer, ConsolidationConfig, ConsolidationEngine, ConsolidationReport,
    MemoryContent, Summarizer,
};
pub use store::{MemoryInput, MemoryScope, MemoryStore};
pub use temporal::{resolve_time_spec, TemporalResolver};
