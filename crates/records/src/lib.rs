//! nexus-records: the SQL source of truth
//!
//! File-path rows, append-only version history, the operation log,
//! bi-temporal memory rows, ReBAC tuples, the spending ledger, and the
//! enforcer audit log, all behind one SQLite write connection. Listing
//! supports keyset pagination with filter-checked opaque cursors.

pub mod agents;
pub mod audit;
pub mod chunks;
pub mod ledger;
pub mod memories;
pub mod models;
pub mod pagination;
pub mod schema;
pub mod store;
pub mod tuples;

pub use agents::{AgentRecord, AgentState};
pub use audit::AuditEvent;
pub use chunks::{ChunkRecord, NewChunk};
pub use ledger::{PeriodType, SpendDecision, SpendingPolicy};
pub use memories::MemoryFilter;
pub use models::{
    now_ms, AuditRecord, FileRecord, LedgerRecord, MemoryRecord, NewFile, NewMemory,
    OperationRecord, PutOutcome, TupleRecord, VersionRecord,
};
pub use pagination::{decode_cursor, encode_cursor, Cursor, ListFilters, PaginatedResult};
pub use store::RecordStore;
pub use tuples::NewTuple;
