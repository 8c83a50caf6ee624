//! Metadata store façade
//!
//! Stateless façade over the record store and the lock & revision
//! service. Each call is one transaction in the record store; nothing
//! partial is ever visible. After a committed mutation the zone revision
//! is bumped, which is what advances consistency tokens and invalidates
//! revision-bucketed caches downstream.

use crate::types::{DeletedFile, FileMetadata, DIR_FILE_TYPE};
use nexus_core::Result;
use nexus_locks::{LockInfo, LockService, RevisionCounter};
use nexus_records::{NewFile, PaginatedResult, RecordStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Result of a façade put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// Stable row id
    pub path_id: String,
    /// Version after the put
    pub version: u64,
    /// Zone revision after the post-commit bump
    pub revision: u64,
}

/// The metadata store façade
///
/// Cheap to clone; all instances share the same record store, lock table,
/// and revision counters.
#[derive(Clone)]
pub struct MetadataStore {
    records: Arc<RecordStore>,
    locks: Arc<LockService>,
    revisions: Arc<RevisionCounter>,
}

impl MetadataStore {
    /// Compose a façade from its parts
    pub fn new(
        records: Arc<RecordStore>,
        locks: Arc<LockService>,
        revisions: Arc<RevisionCounter>,
    ) -> Self {
        MetadataStore {
            records,
            locks,
            revisions,
        }
    }

    /// The underlying record store
    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    /// The revision counter shared with caches and tokens
    pub fn revisions(&self) -> &Arc<RevisionCounter> {
        &self.revisions
    }

    // ========================================================================
    // Core file operations
    // ========================================================================

    /// Store or update file metadata
    ///
    /// Create and update both append version history and an operation-log
    /// row inside the transaction; failures are logged to the operation
    /// log and rolled back entirely.
    pub fn put(&self, metadata: &FileMetadata) -> Result<PutResult> {
        metadata.validate()?;
        let file_type = if metadata.is_directory {
            Some(DIR_FILE_TYPE.to_string())
        } else {
            metadata.mime_type.clone()
        };
        let new = NewFile {
            virtual_path: metadata.path.clone(),
            zone_id: metadata.zone_id.clone(),
            backend_id: metadata
                .backend_name
                .clone()
                .unwrap_or_else(|| "local".to_string()),
            physical_path: metadata
                .physical_path
                .clone()
                .unwrap_or_else(|| metadata.path.clone()),
            size_bytes: metadata.size,
            content_hash: metadata.etag.clone(),
            file_type,
            owner_id: metadata.owner_id.clone(),
            created_by: metadata.created_by.clone(),
            agent_id: None,
        };

        let outcome = match self.records.put_file(&new) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = self.records.log_failure(
                    "write",
                    &metadata.zone_id,
                    &metadata.path,
                    &e.to_string(),
                );
                return Err(e);
            }
        };
        let revision = self.revisions.bump(&metadata.zone_id);
        debug!(path = metadata.path.as_str(), version = outcome.version, revision, "put");
        Ok(PutResult {
            path_id: outcome.path_id,
            version: outcome.version,
            revision,
        })
    }

    /// Fetch metadata for a path
    pub fn get(&self, zone_id: &str, path: &str) -> Result<Option<FileMetadata>> {
        Ok(self
            .records
            .get_file(zone_id, path)?
            .map(FileMetadata::from_record))
    }

    /// Whether metadata exists for a path
    pub fn exists(&self, zone_id: &str, path: &str) -> Result<bool> {
        self.records.file_exists(zone_id, path)
    }

    /// Soft-delete a path, returning the deleted snapshot
    pub fn delete(&self, zone_id: &str, path: &str) -> Result<Option<DeletedFile>> {
        let deleted = match self.records.delete_file(zone_id, path) {
            Ok(d) => d,
            Err(e) => {
                let _ = self
                    .records
                    .log_failure("delete", zone_id, path, &e.to_string());
                return Err(e);
            }
        };
        if deleted.is_some() {
            self.revisions.bump(zone_id);
        }
        Ok(deleted.map(|record| DeletedFile {
            path: record.virtual_path,
            size: record.size_bytes,
            etag: record.content_hash,
        }))
    }

    /// Rename a path; the target must not collide
    pub fn rename(&self, zone_id: &str, old_path: &str, new_path: &str) -> Result<()> {
        if let Err(e) = self.records.rename_file(zone_id, old_path, new_path) {
            let _ = self
                .records
                .log_failure("rename", zone_id, old_path, &e.to_string());
            return Err(e);
        }
        self.revisions.bump(zone_id);
        Ok(())
    }

    /// List metadata under a prefix
    pub fn list(
        &self,
        prefix: &str,
        recursive: bool,
        zone_id: Option<&str>,
    ) -> Result<Vec<FileMetadata>> {
        Ok(self
            .records
            .list_files(prefix, recursive, zone_id)?
            .into_iter()
            .map(FileMetadata::from_record)
            .collect())
    }

    /// Keyset-paginated listing with an opaque, filter-checked cursor
    pub fn list_paginated(
        &self,
        prefix: &str,
        recursive: bool,
        limit: usize,
        cursor: Option<&str>,
        zone_id: Option<&str>,
    ) -> Result<PaginatedResult<FileMetadata>> {
        let page = self
            .records
            .list_files_paginated(prefix, recursive, limit, cursor, zone_id)?;
        Ok(PaginatedResult {
            items: page.items.into_iter().map(FileMetadata::from_record).collect(),
            next_cursor: page.next_cursor,
            has_more: page.has_more,
        })
    }

    // ========================================================================
    // Batch operations
    // ========================================================================

    /// Batch fetch; absent paths map to None
    pub fn get_batch(
        &self,
        zone_id: &str,
        paths: &[String],
    ) -> Result<HashMap<String, Option<FileMetadata>>> {
        Ok(self
            .records
            .get_batch(zone_id, paths)?
            .into_iter()
            .map(|(p, rec)| (p, rec.map(FileMetadata::from_record)))
            .collect())
    }

    /// Batch put; each item is its own transaction and revision bump
    ///
    /// The returned results carry strictly increasing revisions, so the
    /// last one is the freshest token source for the whole batch.
    pub fn put_batch(&self, metadata_list: &[FileMetadata]) -> Result<Vec<PutResult>> {
        let mut out = Vec::with_capacity(metadata_list.len());
        for metadata in metadata_list {
            out.push(self.put(metadata)?);
        }
        Ok(out)
    }

    /// Batch delete; missing paths are skipped
    pub fn delete_batch(&self, zone_id: &str, paths: &[String]) -> Result<Vec<DeletedFile>> {
        let mut out = Vec::new();
        for path in paths {
            if let Some(deleted) = self.delete(zone_id, path)? {
                out.push(deleted);
            }
        }
        Ok(out)
    }

    /// Batch map path -> content hash
    pub fn batch_get_content_ids(
        &self,
        zone_id: &str,
        paths: &[String],
    ) -> Result<HashMap<String, Option<String>>> {
        self.records.batch_get_content_ids(zone_id, paths)
    }

    /// Whether files exist underneath this path
    pub fn is_implicit_directory(&self, zone_id: &str, path: &str) -> Result<bool> {
        self.records.is_implicit_directory(zone_id, path)
    }

    // ========================================================================
    // Revision counter
    // ========================================================================

    /// Current revision of a zone
    pub fn revision(&self, zone_id: &str) -> u64 {
        self.revisions.get(zone_id)
    }

    /// Bump a zone's revision explicitly (external mutation committed)
    pub fn bump_revision(&self, zone_id: &str) -> u64 {
        self.revisions.bump(zone_id)
    }

    // ========================================================================
    // Lock delegation
    // ========================================================================

    /// Acquire a distributed lock on a path
    pub fn acquire_lock(
        &self,
        path: &str,
        holder_id: &str,
        max_holders: usize,
        ttl_secs: u64,
    ) -> bool {
        self.locks.acquire(path, holder_id, max_holders, ttl_secs)
    }

    /// Release a distributed lock
    pub fn release_lock(&self, path: &str, holder_id: &str) -> bool {
        self.locks.release(path, holder_id)
    }

    /// Extend a lock's TTL (heartbeat)
    pub fn extend_lock(&self, path: &str, holder_id: &str, ttl_secs: u64) -> bool {
        self.locks.extend(path, holder_id, ttl_secs)
    }

    /// Live lock info for a path
    pub fn get_lock_info(&self, path: &str) -> Option<LockInfo> {
        self.locks.get_info(path)
    }

    /// Active locks under a prefix
    pub fn list_locks(&self, prefix: &str, limit: usize) -> Vec<LockInfo> {
        self.locks.list_locks(prefix, limit)
    }

    /// Drop all holders of a lock (admin)
    pub fn force_release_lock(&self, path: &str) -> bool {
        self.locks.force_release(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade() -> MetadataStore {
        MetadataStore::new(
            Arc::new(RecordStore::open_in_memory().unwrap()),
            Arc::new(LockService::new()),
            Arc::new(RevisionCounter::new()),
        )
    }

    fn meta(path: &str, etag: &str) -> FileMetadata {
        FileMetadata::new(path, "default").with_content(etag, 5)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = facade();
        let result = store.put(&meta("/a", "h1")).unwrap();
        assert_eq!(result.version, 1);
        assert_eq!(result.revision, 1);

        let got = store.get("default", "/a").unwrap().unwrap();
        assert_eq!(got.path, "/a");
        assert_eq!(got.etag.as_deref(), Some("h1"));
        assert_eq!(got.version, 1);
    }

    #[test]
    fn test_put_twice_bumps_version_and_revision() {
        let store = facade();
        store.put(&meta("/a", "h1")).unwrap();
        let second = store.put(&meta("/a", "h2")).unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.revision, 2);
        assert_eq!(store.revision("default"), 2);
    }

    #[test]
    fn test_rename_keeps_content_bumps_version_lineage() {
        let store = facade();
        store.put(&meta("/old", "h1")).unwrap();
        store.rename("default", "/old", "/new").unwrap();

        assert!(store.get("default", "/old").unwrap().is_none());
        let moved = store.get("default", "/new").unwrap().unwrap();
        assert_eq!(moved.etag.as_deref(), Some("h1"));
        // Rename bumped the zone revision
        assert_eq!(store.revision("default"), 2);
    }

    #[test]
    fn test_delete_returns_snapshot() {
        let store = facade();
        store.put(&meta("/x", "h1")).unwrap();
        let deleted = store.delete("default", "/x").unwrap().unwrap();
        assert_eq!(deleted.path, "/x");
        assert_eq!(deleted.etag.as_deref(), Some("h1"));
        assert!(store.delete("default", "/x").unwrap().is_none());
    }

    #[test]
    fn test_directory_metadata() {
        let store = facade();
        let mut dir = FileMetadata::new("/ws", "default");
        dir.is_directory = true;
        store.put(&dir).unwrap();
        let got = store.get("default", "/ws").unwrap().unwrap();
        assert!(got.is_directory);
        assert!(got.mime_type.is_none());
    }

    #[test]
    fn test_put_batch_and_list() {
        let store = facade();
        store
            .put_batch(&[meta("/ws/a", "h1"), meta("/ws/b", "h2"), meta("/zz", "h3")])
            .unwrap();
        let listed = store.list("/ws", true, Some("default")).unwrap();
        assert_eq!(listed.len(), 2);
        // Three puts, three revision bumps
        assert_eq!(store.revision("default"), 3);
    }

    #[test]
    fn test_list_paginated_continuation() {
        let store = facade();
        for i in 0..7 {
            store.put(&meta(&format!("/p/f{i}"), "h")).unwrap();
        }
        let first = store
            .list_paginated("/p", true, 4, None, Some("default"))
            .unwrap();
        assert_eq!(first.items.len(), 4);
        assert!(first.has_more);

        let second = store
            .list_paginated("/p", true, 4, first.next_cursor.as_deref(), Some("default"))
            .unwrap();
        assert_eq!(second.items.len(), 3);
        assert!(!second.has_more);
    }

    #[test]
    fn test_lock_delegation() {
        let store = facade();
        assert!(store.acquire_lock("/a", "h1", 1, 30));
        assert!(!store.acquire_lock("/a", "h2", 1, 30));
        assert!(store.extend_lock("/a", "h1", 60));
        assert_eq!(store.get_lock_info("/a").unwrap().holders.len(), 1);
        assert!(store.release_lock("/a", "h1"));
    }

    #[test]
    fn test_validation_failure_before_write() {
        let store = facade();
        assert!(store.put(&meta("relative", "h")).is_err());
        assert_eq!(store.revision("default"), 0);
    }
}
