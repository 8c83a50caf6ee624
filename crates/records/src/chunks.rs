//! Document chunk rows backing the search indexes
//!
//! Each indexed file is split into chunks; the daemon loads these at
//! warm-up and replaces a file's chunk set on refresh. Embeddings are
//! stored as JSON arrays of f32.

use crate::models::now_ms;
use crate::store::{db_err, RecordStore};
use nexus_core::Result;
use rusqlite::{params, Row};
use uuid::Uuid;

/// One row of `document_chunks`
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub path_id: String,
    pub chunk_index: u32,
    pub chunk_text: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
}

/// Input for one chunk of a document
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_text: String,
    pub embedding: Option<Vec<f32>>,
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let embedding_raw: Option<String> = row.get("embedding")?;
    let embedding = embedding_raw.and_then(|s| serde_json::from_str(&s).ok());
    Ok(ChunkRecord {
        chunk_id: row.get("chunk_id")?,
        path_id: row.get("path_id")?,
        chunk_index: row.get::<_, i64>("chunk_index")? as u32,
        chunk_text: row.get("chunk_text")?,
        embedding,
        created_at: row.get("created_at")?,
    })
}

impl RecordStore {
    /// Replace the chunk set of one document atomically
    pub fn replace_document_chunks(&self, path_id: &str, chunks: &[NewChunk]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM document_chunks WHERE path_id = ?1",
            params![path_id],
        )
        .map_err(db_err)?;
        for (idx, chunk) in chunks.iter().enumerate() {
            let embedding_json = match &chunk.embedding {
                Some(v) => Some(serde_json::to_string(v)?),
                None => None,
            };
            tx.execute(
                "INSERT INTO document_chunks \
                 (chunk_id, path_id, chunk_index, chunk_text, embedding, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    path_id,
                    idx as i64,
                    chunk.chunk_text,
                    embedding_json,
                    now_ms(),
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    /// Drop all chunks of a document
    pub fn delete_document_chunks(&self, path_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM document_chunks WHERE path_id = ?1",
            params![path_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Chunks of one document, in chunk order
    pub fn list_document_chunks(&self, path_id: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM document_chunks WHERE path_id = ?1 ORDER BY chunk_index",
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![path_id], row_to_chunk)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }

    /// Every chunk in the store (daemon warm-up bulk load)
    pub fn list_all_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM document_chunks ORDER BY path_id, chunk_index")
            .map_err(db_err)?;
        let result = stmt
            .query_map([], row_to_chunk)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }

    /// Chunks of every live file, joined to their virtual paths
    pub fn list_chunks_with_paths(&self) -> Result<Vec<(String, ChunkRecord)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT f.virtual_path AS virtual_path, c.* FROM document_chunks c \
                 JOIN file_paths f ON f.path_id = c.path_id \
                 WHERE f.deleted_at IS NULL \
                 ORDER BY f.virtual_path, c.chunk_index",
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map([], |row| {
                let path: String = row.get("virtual_path")?;
                Ok((path, row_to_chunk(row)?))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }

    /// Chunks for one live virtual path (incremental refresh)
    pub fn chunks_for_path(&self, path: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT c.* FROM document_chunks c \
                 JOIN file_paths f ON f.path_id = c.path_id \
                 WHERE f.virtual_path = ?1 AND f.deleted_at IS NULL \
                 ORDER BY c.chunk_index",
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![path], row_to_chunk)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }
}
