//! Row types for the record store
//!
//! Each struct mirrors one table. `validate()` runs schema invariants
//! before any write; a failed validation is a typed error and nothing
//! reaches the database.

use chrono::Utc;
use nexus_core::{NexusError, Result};
use serde::{Deserialize, Serialize};

/// Current time in epoch milliseconds (the canonical timestamp unit)
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// One row of `file_paths`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path_id: String,
    pub virtual_path: String,
    pub zone_id: String,
    pub backend_id: String,
    pub physical_path: String,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub file_type: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub accessed_at: Option<i64>,
    pub deleted_at: Option<i64>,
    pub current_version: u64,
    pub owner_id: Option<String>,
    pub locked_by: Option<String>,
}

/// Input for a file put (create or update decided by the store)
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub virtual_path: String,
    pub zone_id: String,
    pub backend_id: String,
    pub physical_path: String,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub file_type: Option<String>,
    pub owner_id: Option<String>,
    pub created_by: Option<String>,
    pub agent_id: Option<String>,
}

impl NewFile {
    /// Check invariants before any write
    pub fn validate(&self) -> Result<()> {
        if !self.virtual_path.starts_with('/') {
            return Err(NexusError::Validation(format!(
                "virtual_path must be absolute: {:?}",
                self.virtual_path
            )));
        }
        if self.virtual_path.contains('\0') {
            return Err(NexusError::Validation(
                "virtual_path contains a null byte".to_string(),
            ));
        }
        if self.zone_id.is_empty() {
            return Err(NexusError::Validation("zone_id is empty".to_string()));
        }
        Ok(())
    }
}

/// Result of a file put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Row id (stable across updates)
    pub path_id: String,
    /// Version after this put (1 for a fresh create)
    pub version: u64,
    /// Whether a new row was created
    pub created: bool,
}

/// One row of `version_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub version_number: u64,
    pub content_hash: Option<String>,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub parent_version_id: Option<String>,
    pub source_type: String,
    pub change_reason: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
}

/// One row of `operation_log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: String,
    pub operation_type: String,
    pub zone_id: String,
    pub agent_id: Option<String>,
    pub path: String,
    pub new_path: Option<String>,
    pub snapshot_hash: Option<String>,
    pub metadata_snapshot: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// One row of `memories`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: String,
    pub content_hash: String,
    pub zone_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub scope: String,
    pub visibility: String,
    pub memory_type: Option<String>,
    pub importance: f64,
    pub namespace: Option<String>,
    pub path_key: Option<String>,
    pub current_version: u64,
    pub supersedes_id: Option<String>,
    pub superseded_by_id: Option<String>,
    pub valid_at: Option<i64>,
    pub invalid_at: Option<i64>,
    pub created_at: i64,
    pub state: String,
    pub is_archived: bool,
    pub parent_memory_id: Option<String>,
    pub consolidated_from: Option<Vec<String>>,
    pub entities_json: Option<String>,
    pub embedding_json: Option<String>,
}

impl MemoryRecord {
    /// A memory is current iff it has not been invalidated or superseded
    pub fn is_current(&self) -> bool {
        self.invalid_at.is_none() && self.superseded_by_id.is_none()
    }

    /// Bi-temporal containment: was this row valid at time `t`?
    pub fn valid_at_time(&self, t: i64) -> bool {
        let starts = self.valid_at.map_or(true, |v| v <= t);
        let ends = self.invalid_at.map_or(true, |inv| inv > t);
        starts && ends
    }
}

/// Input for a memory insert
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content_hash: String,
    pub zone_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub scope: String,
    pub visibility: String,
    pub memory_type: Option<String>,
    pub importance: f64,
    pub namespace: Option<String>,
    pub path_key: Option<String>,
    pub valid_at: Option<i64>,
    pub change_reason: Option<String>,
    pub entities_json: Option<String>,
    pub embedding_json: Option<String>,
}

impl NewMemory {
    /// Check invariants before any write
    pub fn validate(&self) -> Result<()> {
        if self.content_hash.is_empty() {
            return Err(NexusError::Validation("content_hash is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(NexusError::Validation(format!(
                "importance must be in [0, 1]: {}",
                self.importance
            )));
        }
        const SCOPES: [&str; 5] = ["agent", "user", "zone", "global", "session"];
        if !SCOPES.contains(&self.scope.as_str()) {
            return Err(NexusError::Validation(format!(
                "unknown scope: {:?}",
                self.scope
            )));
        }
        const VISIBILITIES: [&str; 3] = ["private", "shared", "public"];
        if !VISIBILITIES.contains(&self.visibility.as_str()) {
            return Err(NexusError::Validation(format!(
                "unknown visibility: {:?}",
                self.visibility
            )));
        }
        Ok(())
    }
}

/// One row of `rebac_tuples`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleRecord {
    pub tuple_id: String,
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
    pub relation: String,
    pub object_type: String,
    pub object_id: String,
    pub tenant_id: String,
    pub conditions: Option<String>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

/// One row of `spending_ledger`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub ledger_id: String,
    pub agent_id: String,
    pub zone_id: String,
    pub period_type: String,
    pub period_start: i64,
    pub amount_spent_micro: i64,
    pub tx_count: u64,
    pub updated_at: i64,
}

/// One row of `audit_log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: String,
    pub bypass_type: Option<String>,
    pub allowed: bool,
    pub denial_reason: Option<String>,
    pub subject_type: String,
    pub subject_id: String,
    pub permission: String,
    pub path: String,
    pub zone_id: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_validate() {
        let mut f = NewFile {
            virtual_path: "/a.txt".to_string(),
            zone_id: "default".to_string(),
            backend_id: "local".to_string(),
            physical_path: "/a.txt".to_string(),
            ..NewFile::default()
        };
        assert!(f.validate().is_ok());

        f.virtual_path = "relative.txt".to_string();
        assert!(f.validate().is_err());

        f.virtual_path = "/a\0b".to_string();
        assert!(f.validate().is_err());
    }

    #[test]
    fn test_new_memory_validate() {
        let mut m = NewMemory {
            content_hash: "abc".to_string(),
            scope: "user".to_string(),
            visibility: "private".to_string(),
            importance: 0.5,
            ..NewMemory::default()
        };
        assert!(m.validate().is_ok());

        m.importance = 1.5;
        assert!(m.validate().is_err());
        m.importance = 0.5;

        m.scope = "galaxy".to_string();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_memory_is_current() {
        let mut m = MemoryRecord {
            memory_id: "m1".to_string(),
            content_hash: "h".to_string(),
            zone_id: None,
            user_id: None,
            agent_id: None,
            scope: "user".to_string(),
            visibility: "private".to_string(),
            memory_type: None,
            importance: 0.5,
            namespace: None,
            path_key: None,
            current_version: 1,
            supersedes_id: None,
            superseded_by_id: None,
            valid_at: None,
            invalid_at: None,
            created_at: 0,
            state: "active".to_string(),
            is_archived: false,
            parent_memory_id: None,
            consolidated_from: None,
            entities_json: None,
            embedding_json: None,
        };
        assert!(m.is_current());
        m.superseded_by_id = Some("m2".to_string());
        assert!(!m.is_current());
    }

    #[test]
    fn test_memory_bitemporal_predicate() {
        let mut m = MemoryRecord {
            memory_id: "m1".to_string(),
            content_hash: "h".to_string(),
            zone_id: None,
            user_id: None,
            agent_id: None,
            scope: "user".to_string(),
            visibility: "private".to_string(),
            memory_type: None,
            importance: 0.5,
            namespace: None,
            path_key: None,
            current_version: 1,
            supersedes_id: None,
            superseded_by_id: None,
            valid_at: Some(100),
            invalid_at: Some(200),
            created_at: 0,
            state: "active".to_string(),
            is_archived: false,
            parent_memory_id: None,
            consolidated_from: None,
            entities_json: None,
            embedding_json: None,
        };
        assert!(!m.valid_at_time(99));
        assert!(m.valid_at_time(100));
        assert!(m.valid_at_time(199));
        assert!(!m.valid_at_time(200));

        m.valid_at = None;
        m.invalid_at = None;
        assert!(m.valid_at_time(0));
        assert!(m.valid_at_time(i64::MAX));
    }
}
