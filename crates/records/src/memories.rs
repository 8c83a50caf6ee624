//! Bi-temporal memory rows
//!
//! Upsert never overwrites: a new row is inserted, the predecessor is
//! invalidated (`invalid_at = now`), its `path_key` is cleared to release
//! the unique constraint, and the two rows are linked through
//! `supersedes_id` / `superseded_by_id`. A memory is current iff
//! `invalid_at IS NULL AND superseded_by_id IS NULL`.

use crate::models::{now_ms, MemoryRecord, NewMemory};
use crate::store::{db_err, log_operation_tx, RecordStore};
use nexus_core::Result;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

/// Filter for memory listings
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub zone_id: Option<String>,
    pub scope: Option<String>,
    pub memory_type: Option<String>,
    /// Point-in-time: rows valid at this instant; None means current rows
    pub as_of: Option<i64>,
    /// Include archived rows (consolidation sources)
    pub include_archived: bool,
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let consolidated_raw: Option<String> = row.get("consolidated_from")?;
    let consolidated_from = consolidated_raw.and_then(|s| serde_json::from_str(&s).ok());
    Ok(MemoryRecord {
        memory_id: row.get("memory_id")?,
        content_hash: row.get("content_hash")?,
        zone_id: row.get("zone_id")?,
        user_id: row.get("user_id")?,
        agent_id: row.get("agent_id")?,
        scope: row.get("scope")?,
        visibility: row.get("visibility")?,
        memory_type: row.get("memory_type")?,
        importance: row.get("importance")?,
        namespace: row.get("namespace")?,
        path_key: row.get("path_key")?,
        current_version: row.get::<_, i64>("current_version")? as u64,
        supersedes_id: row.get("supersedes_id")?,
        superseded_by_id: row.get("superseded_by_id")?,
        valid_at: row.get("valid_at")?,
        invalid_at: row.get("invalid_at")?,
        created_at: row.get("created_at")?,
        state: row.get("state")?,
        is_archived: row.get::<_, i64>("is_archived")? != 0,
        parent_memory_id: row.get("parent_memory_id")?,
        consolidated_from,
        entities_json: row.get("entities_json")?,
        embedding_json: row.get("embedding_json")?,
    })
}

impl RecordStore {
    /// Create a memory, superseding any current row with the same
    /// `(user_id, path_key)`
    ///
    /// For corrections (`change_reason = "correction"`) the new row
    /// inherits the predecessor's `valid_at`; otherwise `valid_at` is the
    /// caller's value or now. The predecessor write, the insert, and the
    /// version-history row share one transaction.
    pub fn create_memory(&self, new: &NewMemory) -> Result<MemoryRecord> {
        new.validate()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let now = now_ms();

        let predecessor: Option<MemoryRecord> = match (&new.user_id, &new.path_key) {
            (Some(user_id), Some(path_key)) => tx
                .query_row(
                    "SELECT * FROM memories \
                     WHERE user_id = ?1 AND path_key = ?2 \
                     AND invalid_at IS NULL AND superseded_by_id IS NULL",
                    params![user_id, path_key],
                    row_to_memory,
                )
                .optional()
                .map_err(db_err)?,
            _ => None,
        };

        let memory_id = Uuid::new_v4().to_string();
        let (version, supersedes_id, valid_at) = match &predecessor {
            Some(prev) => {
                let inherited = if new.change_reason.as_deref() == Some("correction") {
                    prev.valid_at
                } else {
                    new.valid_at.or(Some(now))
                };
                (
                    prev.current_version + 1,
                    Some(prev.memory_id.clone()),
                    inherited,
                )
            }
            None => (1, None, new.valid_at.or(Some(now))),
        };

        tx.execute(
            "INSERT INTO memories (memory_id, content_hash, zone_id, user_id, agent_id, \
             scope, visibility, memory_type, importance, namespace, path_key, \
             current_version, supersedes_id, valid_at, created_at, state, \
             entities_json, embedding_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
             'active', ?16, ?17)",
            params![
                memory_id,
                new.content_hash,
                new.zone_id,
                new.user_id,
                new.agent_id,
                new.scope,
                new.visibility,
                new.memory_type,
                new.importance,
                new.namespace,
                new.path_key,
                version as i64,
                supersedes_id,
                valid_at,
                now,
                new.entities_json,
                new.embedding_json,
            ],
        )
        .map_err(db_err)?;

        if let Some(prev) = &predecessor {
            tx.execute(
                "UPDATE memories SET invalid_at = ?1, path_key = NULL, superseded_by_id = ?2 \
                 WHERE memory_id = ?3",
                params![now, memory_id, prev.memory_id],
            )
            .map_err(db_err)?;
        }

        tx.execute(
            "INSERT INTO version_history (version_id, resource_type, resource_id, \
             version_number, content_hash, size_bytes, mime_type, parent_version_id, \
             source_type, change_reason, created_by, created_at) \
             VALUES (?1, 'memory', ?2, ?3, ?4, 0, NULL, NULL, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                memory_id,
                version as i64,
                new.content_hash,
                if predecessor.is_some() { "update" } else { "original" },
                new.change_reason,
                new.user_id,
                now,
            ],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        drop(conn);

        self.get_memory(&memory_id)?
            .ok_or_else(|| nexus_core::NexusError::backend("records", "memory vanished after insert"))
    }

    /// Fetch a memory by id
    pub fn get_memory(&self, memory_id: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM memories WHERE memory_id = ?1",
            params![memory_id],
            row_to_memory,
        )
        .optional()
        .map_err(db_err)
    }

    /// The current row for a `(user_id, path_key)` slot
    pub fn find_current_memory(
        &self,
        user_id: &str,
        path_key: &str,
    ) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM memories WHERE user_id = ?1 AND path_key = ?2 \
             AND invalid_at IS NULL AND superseded_by_id IS NULL",
            params![user_id, path_key],
            row_to_memory,
        )
        .optional()
        .map_err(db_err)
    }

    /// List memories matching a filter
    ///
    /// Without `as_of`, only current, non-deleted rows are returned; with
    /// `as_of`, the bi-temporal predicate selects rows valid at that
    /// instant regardless of later supersession.
    pub fn list_memories(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM memories \
                 WHERE (?1 IS NULL OR user_id = ?1) \
                 AND (?2 IS NULL OR agent_id = ?2) \
                 AND (?3 IS NULL OR zone_id = ?3) \
                 AND (?4 IS NULL OR scope = ?4) \
                 AND (?5 IS NULL OR memory_type = ?5) \
                 AND (?8 = 1 OR is_archived = 0) \
                 AND CASE WHEN ?6 IS NULL \
                     THEN (invalid_at IS NULL AND superseded_by_id IS NULL \
                           AND state != 'deleted') \
                     ELSE ((valid_at IS NULL OR valid_at <= ?7) \
                           AND (invalid_at IS NULL OR invalid_at > ?7)) END \
                 ORDER BY created_at",
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map(
                params![
                    filter.user_id,
                    filter.agent_id,
                    filter.zone_id,
                    filter.scope,
                    filter.memory_type,
                    filter.as_of,
                    filter.as_of.unwrap_or(0),
                    filter.include_archived as i64,
                ],
                row_to_memory,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }

    /// Non-destructive delete: invalidate and mark deleted
    pub fn delete_memory(&self, memory_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let n = tx
            .execute(
                "UPDATE memories SET invalid_at = ?1, state = 'deleted', path_key = NULL \
                 WHERE memory_id = ?2 AND state != 'deleted'",
                params![now_ms(), memory_id],
            )
            .map_err(db_err)?;
        if n > 0 {
            log_operation_tx(
                &tx,
                "memory_delete",
                "default",
                memory_id,
                None,
                None,
                None,
                "success",
                None,
            )?;
        }
        tx.commit().map_err(db_err)?;
        Ok(n > 0)
    }

    /// Archive consolidation sources under their consolidated parent
    ///
    /// Sets the archive flag, floors importance to 0.1, and links
    /// `parent_memory_id`.
    pub fn archive_memories(&self, memory_ids: &[String], parent_memory_id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        for id in memory_ids {
            tx.execute(
                "UPDATE memories SET is_archived = 1, importance = 0.1, \
                 parent_memory_id = ?1 WHERE memory_id = ?2",
                params![parent_memory_id, id],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    /// Insert a consolidated memory linking its sources
    pub fn insert_consolidated_memory(
        &self,
        new: &NewMemory,
        source_ids: &[String],
    ) -> Result<MemoryRecord> {
        new.validate()?;
        let memory_id = Uuid::new_v4().to_string();
        let now = now_ms();
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO memories (memory_id, content_hash, zone_id, user_id, agent_id, \
                 scope, visibility, memory_type, importance, namespace, path_key, \
                 current_version, valid_at, created_at, state, consolidated_from, \
                 entities_json, embedding_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'consolidated', ?8, ?9, ?10, 1, ?11, \
                 ?12, 'active', ?13, ?14, ?15)",
                params![
                    memory_id,
                    new.content_hash,
                    new.zone_id,
                    new.user_id,
                    new.agent_id,
                    new.scope,
                    new.visibility,
                    new.importance,
                    new.namespace,
                    new.path_key,
                    new.valid_at.or(Some(now)),
                    now,
                    serde_json::to_string(source_ids)?,
                    new.entities_json,
                    new.embedding_json,
                ],
            )
            .map_err(db_err)?;
        }
        self.get_memory(&memory_id)?
            .ok_or_else(|| nexus_core::NexusError::backend("records", "memory vanished after insert"))
    }
}
