//! Record store: the SQL source of truth
//!
//! Owns a single SQLite write connection behind a mutex; WAL mode, schema
//! applied on open. No code outside this crate touches a raw connection.
//! Each public operation is one transaction: a failed step rolls the whole
//! call back and no partial state is visible.

use crate::models::{
    now_ms, FileRecord, NewFile, OperationRecord, PutOutcome, VersionRecord,
};
use crate::pagination::{decode_cursor, encode_cursor, Cursor, ListFilters, PaginatedResult};
use crate::schema::SCHEMA;
use nexus_core::{NexusError, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Map a rusqlite error into the typed backend error
pub(crate) fn db_err(e: rusqlite::Error) -> NexusError {
    NexusError::backend("records", e.to_string())
}

/// SQL source of truth for file paths, versions, operations, memories,
/// tuples, spending, and audit rows
pub struct RecordStore {
    pub(crate) conn: Mutex<Connection>,
}

fn configure(conn: &Connection) -> Result<()> {
    // WAL may be unsupported for in-memory databases; best effort
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(db_err)?;
    conn.execute_batch(SCHEMA).map_err(db_err)?;
    Ok(())
}

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        path_id: row.get("path_id")?,
        virtual_path: row.get("virtual_path")?,
        zone_id: row.get("zone_id")?,
        backend_id: row.get("backend_id")?,
        physical_path: row.get("physical_path")?,
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        content_hash: row.get("content_hash")?,
        file_type: row.get("file_type")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        accessed_at: row.get("accessed_at")?,
        deleted_at: row.get("deleted_at")?,
        current_version: row.get::<_, i64>("current_version")? as u64,
        owner_id: row.get("owner_id")?,
        locked_by: row.get("locked_by")?,
    })
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<VersionRecord> {
    Ok(VersionRecord {
        version_id: row.get("version_id")?,
        resource_type: row.get("resource_type")?,
        resource_id: row.get("resource_id")?,
        version_number: row.get::<_, i64>("version_number")? as u64,
        content_hash: row.get("content_hash")?,
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        mime_type: row.get("mime_type")?,
        parent_version_id: row.get("parent_version_id")?,
        source_type: row.get("source_type")?,
        change_reason: row.get("change_reason")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_operation(row: &Row<'_>) -> rusqlite::Result<OperationRecord> {
    Ok(OperationRecord {
        operation_id: row.get("operation_id")?,
        operation_type: row.get("operation_type")?,
        zone_id: row.get("zone_id")?,
        agent_id: row.get("agent_id")?,
        path: row.get("path")?,
        new_path: row.get("new_path")?,
        snapshot_hash: row.get("snapshot_hash")?,
        metadata_snapshot: row.get("metadata_snapshot")?,
        status: row.get("status")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
    })
}

/// Append one operation-log row inside an open transaction
pub(crate) fn log_operation_tx(
    tx: &rusqlite::Transaction<'_>,
    operation_type: &str,
    zone_id: &str,
    path: &str,
    agent_id: Option<&str>,
    new_path: Option<&str>,
    snapshot_hash: Option<&str>,
    status: &str,
    error_message: Option<&str>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO operation_log (operation_id, operation_type, zone_id, agent_id, path, \
         new_path, snapshot_hash, metadata_snapshot, status, error_message, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10)",
        params![
            Uuid::new_v4().to_string(),
            operation_type,
            zone_id,
            agent_id,
            path,
            new_path,
            snapshot_hash,
            status,
            error_message,
            now_ms(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

impl RecordStore {
    /// Open a file-backed store, creating the schema if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        configure(&conn)?;
        Ok(RecordStore {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        configure(&conn)?;
        Ok(RecordStore {
            conn: Mutex::new(conn),
        })
    }

    /// Connectivity probe used by the search daemon at warm-up
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(db_err)?;
        Ok(())
    }

    // ========================================================================
    // File paths
    // ========================================================================

    /// Create or update a file row (the put contract)
    ///
    /// One transaction covering: soft-deleted slot cleanup, row insert or
    /// atomic version bump via `UPDATE … RETURNING`, version-history
    /// append with parent lineage, and the operation-log row.
    pub fn put_file(&self, new: &NewFile) -> Result<PutOutcome> {
        new.validate()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT path_id, current_version FROM file_paths \
                 WHERE zone_id = ?1 AND virtual_path = ?2 AND deleted_at IS NULL",
                params![new.zone_id, new.virtual_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let now = now_ms();
        let outcome = match existing {
            None => {
                // Free the unique slot held by a soft-deleted row, if any
                tx.execute(
                    "DELETE FROM file_paths \
                     WHERE zone_id = ?1 AND virtual_path = ?2 AND deleted_at IS NOT NULL",
                    params![new.zone_id, new.virtual_path],
                )
                .map_err(db_err)?;

                let path_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO file_paths (path_id, virtual_path, zone_id, backend_id, \
                     physical_path, size_bytes, content_hash, file_type, created_at, \
                     updated_at, current_version, owner_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)",
                    params![
                        path_id,
                        new.virtual_path,
                        new.zone_id,
                        new.backend_id,
                        new.physical_path,
                        new.size_bytes as i64,
                        new.content_hash,
                        new.file_type,
                        now,
                        now,
                        new.owner_id,
                    ],
                )
                .map_err(db_err)?;

                if new.content_hash.is_some() {
                    insert_version_tx(&tx, "file", &path_id, 1, new, None, "original")?;
                }

                PutOutcome {
                    path_id,
                    version: 1,
                    created: true,
                }
            }
            Some((path_id, prior_version)) => {
                if new.content_hash.is_some() {
                    let parent_version_id: Option<String> = tx
                        .query_row(
                            "SELECT version_id FROM version_history \
                             WHERE resource_type = 'file' AND resource_id = ?1 \
                             AND version_number = ?2 LIMIT 1",
                            params![path_id, prior_version],
                            |row| row.get(0),
                        )
                        .optional()
                        .map_err(db_err)?;

                    let new_version: i64 = tx
                        .query_row(
                            "UPDATE file_paths SET \
                             backend_id = ?1, physical_path = ?2, size_bytes = ?3, \
                             content_hash = ?4, file_type = ?5, updated_at = ?6, \
                             owner_id = COALESCE(?7, owner_id), \
                             current_version = current_version + 1 \
                             WHERE path_id = ?8 \
                             RETURNING current_version",
                            params![
                                new.backend_id,
                                new.physical_path,
                                new.size_bytes as i64,
                                new.content_hash,
                                new.file_type,
                                now,
                                new.owner_id,
                                path_id,
                            ],
                            |row| row.get(0),
                        )
                        .map_err(db_err)?;

                    insert_version_tx(
                        &tx,
                        "file",
                        &path_id,
                        new_version,
                        new,
                        parent_version_id.as_deref(),
                        "original",
                    )?;

                    PutOutcome {
                        path_id,
                        version: new_version as u64,
                        created: false,
                    }
                } else {
                    // Metadata-only update, no version bump
                    tx.execute(
                        "UPDATE file_paths SET backend_id = ?1, physical_path = ?2, \
                         size_bytes = ?3, file_type = ?4, updated_at = ?5, \
                         owner_id = COALESCE(?6, owner_id) \
                         WHERE path_id = ?7",
                        params![
                            new.backend_id,
                            new.physical_path,
                            new.size_bytes as i64,
                            new.file_type,
                            now,
                            new.owner_id,
                            path_id,
                        ],
                    )
                    .map_err(db_err)?;

                    PutOutcome {
                        path_id,
                        version: prior_version as u64,
                        created: false,
                    }
                }
            }
        };

        log_operation_tx(
            &tx,
            "write",
            &new.zone_id,
            &new.virtual_path,
            new.agent_id.as_deref(),
            None,
            new.content_hash.as_deref(),
            "success",
            None,
        )?;

        tx.commit().map_err(db_err)?;
        Ok(outcome)
    }

    /// Fetch a non-deleted file row by zone and path
    pub fn get_file(&self, zone_id: &str, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM file_paths \
             WHERE zone_id = ?1 AND virtual_path = ?2 AND deleted_at IS NULL",
            params![zone_id, path],
            row_to_file,
        )
        .optional()
        .map_err(db_err)
    }

    /// Fetch a file row by id, deleted or not
    pub fn get_file_by_id(&self, path_id: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM file_paths WHERE path_id = ?1",
            params![path_id],
            row_to_file,
        )
        .optional()
        .map_err(db_err)
    }

    /// Whether a non-deleted row exists at the path
    pub fn file_exists(&self, zone_id: &str, path: &str) -> Result<bool> {
        Ok(self.get_file(zone_id, path)?.is_some())
    }

    /// Soft-delete a file row, returning its pre-delete snapshot
    pub fn delete_file(&self, zone_id: &str, path: &str) -> Result<Option<FileRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let existing = tx
            .query_row(
                "SELECT * FROM file_paths \
                 WHERE zone_id = ?1 AND virtual_path = ?2 AND deleted_at IS NULL",
                params![zone_id, path],
                row_to_file,
            )
            .optional()
            .map_err(db_err)?;

        let Some(record) = existing else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE file_paths SET deleted_at = ?1 WHERE path_id = ?2",
            params![now_ms(), record.path_id],
        )
        .map_err(db_err)?;

        log_operation_tx(
            &tx,
            "delete",
            zone_id,
            path,
            None,
            None,
            record.content_hash.as_deref(),
            "success",
            None,
        )?;

        tx.commit().map_err(db_err)?;
        Ok(Some(record))
    }

    /// Rename a file row; rejects collisions with existing non-deleted rows
    pub fn rename_file(&self, zone_id: &str, old_path: &str, new_path: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let existing = tx
            .query_row(
                "SELECT path_id FROM file_paths \
                 WHERE zone_id = ?1 AND virtual_path = ?2 AND deleted_at IS NULL",
                params![zone_id, old_path],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(path_id) = existing else {
            return Err(NexusError::NotFound(format!("no metadata for {old_path}")));
        };

        let collision: Option<String> = tx
            .query_row(
                "SELECT path_id FROM file_paths \
                 WHERE zone_id = ?1 AND virtual_path = ?2 AND deleted_at IS NULL",
                params![zone_id, new_path],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if collision.is_some() {
            return Err(NexusError::Conflict(format!(
                "target path already exists: {new_path}"
            )));
        }

        tx.execute(
            "UPDATE file_paths SET virtual_path = ?1, updated_at = ?2 WHERE path_id = ?3",
            params![new_path, now_ms(), path_id],
        )
        .map_err(db_err)?;

        log_operation_tx(
            &tx,
            "rename",
            zone_id,
            old_path,
            None,
            Some(new_path),
            None,
            "success",
            None,
        )?;

        tx.commit().map_err(db_err)?;
        Ok(())
    }

    /// List non-deleted rows under a prefix, ordered by path
    pub fn list_files(
        &self,
        prefix: &str,
        recursive: bool,
        zone_id: Option<&str>,
    ) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM file_paths \
                 WHERE deleted_at IS NULL \
                 AND (?1 = '' OR virtual_path = ?1 OR virtual_path LIKE ?2 ESCAPE '\\') \
                 AND (?3 IS NULL OR zone_id = ?3) \
                 ORDER BY virtual_path",
            )
            .map_err(db_err)?;
        let like = format!("{}%", escape_like(prefix));
        let rows = stmt
            .query_map(params![prefix, like, zone_id], row_to_file)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        Ok(if recursive {
            rows
        } else {
            rows.into_iter()
                .filter(|r| is_direct_child(&r.virtual_path, prefix))
                .collect()
        })
    }

    /// Keyset-paginated listing
    ///
    /// The cursor is opaque and carries the filter set; a cursor issued
    /// for different filters is refused.
    pub fn list_files_paginated(
        &self,
        prefix: &str,
        recursive: bool,
        limit: usize,
        cursor: Option<&str>,
        zone_id: Option<&str>,
    ) -> Result<PaginatedResult<FileRecord>> {
        let filters = ListFilters {
            prefix: prefix.to_string(),
            recursive,
            zone_id: zone_id.map(String::from),
        };
        let after = match cursor {
            Some(c) => Some(decode_cursor(c, &filters)?.last_path),
            None => None,
        };

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM file_paths \
                 WHERE deleted_at IS NULL \
                 AND (?1 = '' OR virtual_path = ?1 OR virtual_path LIKE ?2 ESCAPE '\\') \
                 AND (?3 IS NULL OR zone_id = ?3) \
                 AND (?4 IS NULL OR virtual_path > ?4) \
                 ORDER BY virtual_path LIMIT ?5",
            )
            .map_err(db_err)?;
        let like = format!("{}%", escape_like(prefix));
        let mut rows = stmt
            .query_map(
                params![prefix, like, zone_id, after, (limit + 1) as i64],
                row_to_file,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        if !recursive {
            rows.retain(|r| is_direct_child(&r.virtual_path, prefix));
        }

        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last()
                .map(|last| {
                    encode_cursor(&Cursor {
                        last_path: last.virtual_path.clone(),
                        filters,
                    })
                })
                .transpose()?
        } else {
            None
        };

        Ok(PaginatedResult {
            items: rows,
            next_cursor,
            has_more,
        })
    }

    /// Batch fetch by path; absent paths map to None
    pub fn get_batch(
        &self,
        zone_id: &str,
        paths: &[String],
    ) -> Result<HashMap<String, Option<FileRecord>>> {
        let mut out: HashMap<String, Option<FileRecord>> =
            paths.iter().map(|p| (p.clone(), None)).collect();
        for path in paths {
            if let Some(record) = self.get_file(zone_id, path)? {
                out.insert(path.clone(), Some(record));
            }
        }
        Ok(out)
    }

    /// Batch map path -> content hash for non-deleted rows
    pub fn batch_get_content_ids(
        &self,
        zone_id: &str,
        paths: &[String],
    ) -> Result<HashMap<String, Option<String>>> {
        let batch = self.get_batch(zone_id, paths)?;
        Ok(batch
            .into_iter()
            .map(|(p, rec)| {
                let hash = rec.and_then(|r| r.content_hash);
                (p, hash)
            })
            .collect())
    }

    /// An implicit directory exists when files live underneath it
    pub fn is_implicit_directory(&self, zone_id: &str, path: &str) -> Result<bool> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let conn = self.conn.lock();
        let found: Option<String> = conn
            .query_row(
                "SELECT path_id FROM file_paths \
                 WHERE zone_id = ?1 AND virtual_path LIKE ?2 ESCAPE '\\' \
                 AND deleted_at IS NULL LIMIT 1",
                params![zone_id, format!("{}%", escape_like(&prefix))],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    // ========================================================================
    // Version history
    // ========================================================================

    /// All versions of a resource, oldest first
    pub fn list_versions(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<VersionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM version_history \
                 WHERE resource_type = ?1 AND resource_id = ?2 \
                 ORDER BY version_number",
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![resource_type, resource_id], row_to_version)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }

    // ========================================================================
    // Operation log
    // ========================================================================

    /// Record a failed state-changing call
    pub fn log_failure(
        &self,
        operation_type: &str,
        zone_id: &str,
        path: &str,
        error_message: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        log_operation_tx(
            &tx,
            operation_type,
            zone_id,
            path,
            None,
            None,
            None,
            "failure",
            Some(error_message),
        )?;
        tx.commit().map_err(db_err)
    }

    /// Most recent operations for a zone, newest first
    pub fn list_operations(&self, zone_id: &str, limit: usize) -> Result<Vec<OperationRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM operation_log WHERE zone_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![zone_id, limit as i64], row_to_operation)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }

    // ========================================================================
    // Extended per-file metadata
    // ========================================================================

    /// Set a custom metadata key for a path
    pub fn set_file_metadata(&self, path: &str, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO file_metadata (path, key, value, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (path, key) DO UPDATE SET value = ?3, updated_at = ?4",
            params![path, key, value.to_string(), now_ms()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Get a custom metadata key for a path
    pub fn get_file_metadata(&self, path: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM file_metadata WHERE path = ?1 AND key = ?2",
                params![path, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Cached searchable text for a path (the `parsed_text` key)
    pub fn get_searchable_text(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .get_file_metadata(path, "parsed_text")?
            .and_then(|v| v.as_str().map(String::from)))
    }

    /// Cached searchable text for many paths; absent entries are skipped
    pub fn get_searchable_text_bulk(&self, paths: &[String]) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for path in paths {
            if let Some(text) = self.get_searchable_text(path)? {
                out.insert(path.clone(), text);
            }
        }
        Ok(out)
    }
}

fn insert_version_tx(
    tx: &rusqlite::Transaction<'_>,
    resource_type: &str,
    resource_id: &str,
    version_number: i64,
    new: &NewFile,
    parent_version_id: Option<&str>,
    source_type: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO version_history (version_id, resource_type, resource_id, version_number, \
         content_hash, size_bytes, mime_type, parent_version_id, source_type, change_reason, \
         created_by, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?11)",
        params![
            Uuid::new_v4().to_string(),
            resource_type,
            resource_id,
            version_number,
            new.content_hash,
            new.size_bytes as i64,
            new.file_type,
            parent_version_id,
            source_type,
            new.created_by,
            now_ms(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Escape `%` and `_` for a LIKE pattern with `ESCAPE '\'`
pub(crate) fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Whether `path` is a direct child of `prefix` (no further `/`)
fn is_direct_child(path: &str, prefix: &str) -> bool {
    let rel = path.strip_prefix(prefix).unwrap_or(path);
    let rel = rel.trim_start_matches('/');
    !rel.contains('/')
}
