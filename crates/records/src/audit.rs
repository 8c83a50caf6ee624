//! Audit log for enforcer bypass decisions
//!
//! Every bypass decision (allow or deny) is recorded with the bypass
//! type, the subject identity, and the denial reason when denied. The
//! table is append-only.

use crate::models::{now_ms, AuditRecord};
use crate::store::{db_err, RecordStore};
use nexus_core::Result;
use rusqlite::{params, Row};
use uuid::Uuid;

/// Input for one audit row
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// "admin" or "system" when a bypass path decided; None for normal flow
    pub bypass_type: Option<String>,
    pub allowed: bool,
    pub denial_reason: Option<String>,
    pub subject_type: String,
    pub subject_id: String,
    pub permission: String,
    pub path: String,
    pub zone_id: String,
}

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    Ok(AuditRecord {
        audit_id: row.get("audit_id")?,
        bypass_type: row.get("bypass_type")?,
        allowed: row.get::<_, i64>("allowed")? != 0,
        denial_reason: row.get("denial_reason")?,
        subject_type: row.get("subject_type")?,
        subject_id: row.get("subject_id")?,
        permission: row.get("permission")?,
        path: row.get("path")?,
        zone_id: row.get("zone_id")?,
        created_at: row.get("created_at")?,
    })
}

impl RecordStore {
    /// Append one audit row
    pub fn append_audit(&self, event: &AuditEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_log (audit_id, bypass_type, allowed, denial_reason, \
             subject_type, subject_id, permission, path, zone_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                Uuid::new_v4().to_string(),
                event.bypass_type,
                event.allowed as i64,
                event.denial_reason,
                event.subject_type,
                event.subject_id,
                event.permission,
                event.path,
                event.zone_id,
                now_ms(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent audit rows, newest first
    pub fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM audit_log ORDER BY created_at DESC, rowid DESC LIMIT ?1")
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![limit as i64], row_to_audit)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }
}
