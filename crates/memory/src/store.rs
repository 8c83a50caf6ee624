//! Memory store façade
//!
//! Scope-aware surface over the bi-temporal memory rows. Upserts are
//! append-only supersessions handled inside the record store; this layer
//! adds the scope vocabulary, correction semantics, and point-in-time
//! reads.

use nexus_core::Result;
use nexus_records::{MemoryFilter, MemoryRecord, NewMemory, RecordStore};
use std::sync::Arc;

/// Visibility scope of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    Agent,
    User,
    Zone,
    Global,
    Session,
}

impl MemoryScope {
    /// Stable string form stored in the scope column
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Agent => "agent",
            MemoryScope::User => "user",
            MemoryScope::Zone => "zone",
            MemoryScope::Global => "global",
            MemoryScope::Session => "session",
        }
    }
}

/// Input for a memory write
#[derive(Debug, Clone)]
pub struct MemoryInput {
    /// CAS hash of the memory content
    pub content_hash: String,
    pub zone_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub scope: MemoryScope,
    /// "private", "shared", or "public"
    pub visibility: String,
    pub memory_type: Option<String>,
    pub importance: f64,
    pub namespace: Option<String>,
    /// Upsert slot: a current memory with the same `(user_id, path_key)`
    /// is superseded
    pub path_key: Option<String>,
    /// Event-time start; corrections inherit the predecessor's value
    pub valid_at: Option<i64>,
    /// "correction" preserves the predecessor's event time
    pub change_reason: Option<String>,
    /// Extracted entity JSON
    pub entities_json: Option<String>,
    /// Embedding JSON (array of f32)
    pub embedding_json: Option<String>,
}

impl MemoryInput {
    /// Minimal user-scoped memory
    pub fn new(content_hash: impl Into<String>, user_id: impl Into<String>) -> Self {
        MemoryInput {
            content_hash: content_hash.into(),
            zone_id: None,
            user_id: Some(user_id.into()),
            agent_id: None,
            scope: MemoryScope::User,
            visibility: "private".to_string(),
            memory_type: None,
            importance: 0.5,
            namespace: None,
            path_key: None,
            valid_at: None,
            change_reason: None,
            entities_json: None,
            embedding_json: None,
        }
    }

    /// Builder: upsert slot
    pub fn with_path_key(mut self, path_key: impl Into<String>) -> Self {
        self.path_key = Some(path_key.into());
        self
    }

    /// Builder: importance
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Builder: mark as a correction of the predecessor
    pub fn as_correction(mut self) -> Self {
        self.change_reason = Some("correction".to_string());
        self
    }

    /// Builder: embedding
    pub fn with_embedding(mut self, embedding: &[f32]) -> Self {
        self.embedding_json = serde_json::to_string(embedding).ok();
        self
    }

    fn into_new_memory(self) -> NewMemory {
        NewMemory {
            content_hash: self.content_hash,
            zone_id: self.zone_id,
            user_id: self.user_id,
            agent_id: self.agent_id,
            scope: self.scope.as_str().to_string(),
            visibility: self.visibility,
            memory_type: self.memory_type,
            importance: self.importance,
            namespace: self.namespace,
            path_key: self.path_key,
            valid_at: self.valid_at,
            change_reason: self.change_reason,
            entities_json: self.entities_json,
            embedding_json: self.embedding_json,
        }
    }
}

/// Scope-aware memory store
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<RecordStore>,
}

impl MemoryStore {
    /// Build a store over the shared records
    pub fn new(records: Arc<RecordStore>) -> Self {
        MemoryStore { records }
    }

    /// The underlying record store
    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    /// Create a memory; a current memory at the same slot is superseded
    pub fn create(&self, input: MemoryInput) -> Result<MemoryRecord> {
        self.records.create_memory(&input.into_new_memory())
    }

    /// Fetch by id
    pub fn get(&self, memory_id: &str) -> Result<Option<MemoryRecord>> {
        self.records.get_memory(memory_id)
    }

    /// Current memory at an upsert slot
    pub fn get_current(&self, user_id: &str, path_key: &str) -> Result<Option<MemoryRecord>> {
        self.records.find_current_memory(user_id, path_key)
    }

    /// Current memories of a user
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        self.records.list_memories(&MemoryFilter {
            user_id: Some(user_id.to_string()),
            ..MemoryFilter::default()
        })
    }

    /// Memories of a user as they were valid at an instant
    pub fn list_as_of(&self, user_id: &str, as_of_ms: i64) -> Result<Vec<MemoryRecord>> {
        self.records.list_memories(&MemoryFilter {
            user_id: Some(user_id.to_string()),
            as_of: Some(as_of_ms),
            ..MemoryFilter::default()
        })
    }

    /// Full supersession chain ending at the given memory, oldest first
    pub fn history(&self, memory_id: &str) -> Result<Vec<MemoryRecord>> {
        let mut chain = Vec::new();
        let mut cursor = self.records.get_memory(memory_id)?;
        while let Some(record) = cursor {
            let previous = match &record.supersedes_id {
                Some(id) => self.records.get_memory(id)?,
                None => None,
            };
            chain.push(record);
            cursor = previous;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Non-destructive delete
    pub fn delete(&self, memory_id: &str) -> Result<bool> {
        self.records.delete_memory(memory_id)
    }
}
