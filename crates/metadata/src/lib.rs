//! nexus-metadata: the metadata store façade
//!
//! One surface over the record store (SQL source of truth) and the lock &
//! revision service. A façade call maps to one record-store transaction;
//! after a successful mutation the zone revision is bumped so caches and
//! consistency tokens advance.

pub mod facade;
pub mod types;

pub use facade::{MetadataStore, PutResult};
pub use types::{DeletedFile, FileMetadata};
