//! # Nexus
//!
//! A multi-tenant agent filesystem: a virtual namespace mapping paths to
//! content-addressed blobs, with bi-temporal metadata, relationship-based
//! access control, and a pre-warmed hybrid search daemon.
//!
//! # Quick Start
//!
//! ```no_run
//! use nexus::{AccessContext, NexusFs, Permission};
//!
//! #[tokio::main]
//! async fn main() -> nexus::Result<()> {
//!     let fs = NexusFs::open("./nexus-data")?;
//!     fs.start_search().await?;
//!
//!     let alice = AccessContext::user("alice");
//!     let receipt = fs.write_file("/workspace/notes.md", b"hello nexus", &alice)?;
//!     assert_eq!(receipt.version, 1);
//!
//!     let bytes = fs.read_file("/workspace/notes.md", &alice)?;
//!     assert_eq!(bytes, b"hello nexus");
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Component | Crate | Responsibility |
//! |---|---|---|
//! | Content Store | `nexus-cas` | Ref-counted CAS blobs, atomic publish |
//! | Record Store | `nexus-records` | SQLite SSOT: paths, versions, ops, memories |
//! | Lock & Revision | `nexus-locks` | Bounded TTL locks, zone revisions |
//! | Metadata Façade | `nexus-metadata` | put/get/list/delete/rename over the SSOT |
//! | ReBAC | `nexus-rebac` | Tuples, rewrites, mount resolver, enforcer |
//! | Search | `nexus-search` | Warm BM25 + vector indexes, hybrid fusion |
//! | Memory | `nexus-memory` | Bi-temporal supersession, consolidation |
//!
//! The [`NexusFs`] façade wires the write path end to end: enforce →
//! store content → record metadata → bump the zone revision → queue the
//! search refresh.

mod fs;

pub use fs::{chunk_text, CasMemoryContent, NexusConfig, NexusFs, WriteReceipt};

pub use nexus_cas::{ContentStore, LocalBackend};
pub use nexus_core::{
    CasConfig, ConsistencyToken, DaemonConfig, DenialReason, EnforcerConfig, GraphLimits,
    LimitType, LockConfig, NexusError, ObjectRef, Permission, RebacConfig, ResolverConfig,
    Response, Result, Subject, TokenCodec, VirtualPath, ZoneId,
};
pub use nexus_locks::{GenerationGuard, HeartbeatBuffer, LockService, RevisionCounter};
pub use nexus_memory::{
    ConsolidationConfig, ConsolidationEngine, MemoryContent, MemoryInput, MemoryStore,
    Summarizer,
};
pub use nexus_metadata::{FileMetadata, MetadataStore, PutResult};
pub use nexus_rebac::{
    AccessContext, CheckResult, Consistency, NamespaceConfig, NamespaceRegistry,
    PermissionEnforcer, RebacEngine, TupleInput,
};
pub use nexus_records::{PaginatedResult, RecordStore};
pub use nexus_search::{
    Embedder, FusionMethod, HashEmbedder, SearchDaemon, SearchMode, SearchResult,
};
