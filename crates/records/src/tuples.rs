//! ReBAC tuple storage
//!
//! Tuples live under a tenant (the API calls it a zone; the column keeps
//! the original `tenant_id` name). The wildcard subject `("*", "*")`
//! grants across tenants, so wildcard rows match regardless of the tenant
//! filter. Expired tuples are invisible to every query here.

use crate::models::{now_ms, TupleRecord};
use crate::store::{db_err, RecordStore};
use nexus_core::Result;
use rusqlite::{params, Row};
use uuid::Uuid;

/// Input for a tuple write
#[derive(Debug, Clone)]
pub struct NewTuple {
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
    pub relation: String,
    pub object_type: String,
    pub object_id: String,
    pub tenant_id: String,
    pub conditions: Option<serde_json::Value>,
    pub expires_at: Option<i64>,
}

fn row_to_tuple(row: &Row<'_>) -> rusqlite::Result<TupleRecord> {
    Ok(TupleRecord {
        tuple_id: row.get("tuple_id")?,
        subject_type: row.get("subject_type")?,
        subject_id: row.get("subject_id")?,
        subject_relation: row.get("subject_relation")?,
        relation: row.get("relation")?,
        object_type: row.get("object_type")?,
        object_id: row.get("object_id")?,
        tenant_id: row.get("tenant_id")?,
        conditions: row.get("conditions")?,
        expires_at: row.get("expires_at")?,
        created_at: row.get("created_at")?,
    })
}

impl RecordStore {
    /// Insert a tuple, returning the stored row
    pub fn insert_tuple(&self, new: &NewTuple) -> Result<TupleRecord> {
        let tuple_id = Uuid::new_v4().to_string();
        let created_at = now_ms();
        let conditions = new.conditions.as_ref().map(|c| c.to_string());
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rebac_tuples (tuple_id, subject_type, subject_id, subject_relation, \
             relation, object_type, object_id, tenant_id, conditions, expires_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                tuple_id,
                new.subject_type,
                new.subject_id,
                new.subject_relation,
                new.relation,
                new.object_type,
                new.object_id,
                new.tenant_id,
                conditions,
                new.expires_at,
                created_at,
            ],
        )
        .map_err(db_err)?;
        Ok(TupleRecord {
            tuple_id,
            subject_type: new.subject_type.clone(),
            subject_id: new.subject_id.clone(),
            subject_relation: new.subject_relation.clone(),
            relation: new.relation.clone(),
            object_type: new.object_type.clone(),
            object_id: new.object_id.clone(),
            tenant_id: new.tenant_id.clone(),
            conditions,
            expires_at: new.expires_at,
            created_at,
        })
    }

    /// Delete a tuple by id; false when absent
    pub fn delete_tuple(&self, tuple_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .execute(
                "DELETE FROM rebac_tuples WHERE tuple_id = ?1",
                params![tuple_id],
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// Delete tuples matching an exact shape; returns how many went away
    pub fn delete_tuples_matching(
        &self,
        subject_type: &str,
        subject_id: &str,
        relation: &str,
        object_type: &str,
        object_id: &str,
        tenant_id: &str,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn
            .execute(
                "DELETE FROM rebac_tuples WHERE subject_type = ?1 AND subject_id = ?2 \
                 AND relation = ?3 AND object_type = ?4 AND object_id = ?5 AND tenant_id = ?6",
                params![
                    subject_type,
                    subject_id,
                    relation,
                    object_type,
                    object_id,
                    tenant_id
                ],
            )
            .map_err(db_err)?;
        Ok(n)
    }

    /// Reverse walk: live tuples on an object with a given relation
    ///
    /// Used by tuple-to-userset expansion; the subjects of the returned
    /// rows are the parent objects.
    pub fn list_object_tuples(
        &self,
        object_type: &str,
        object_id: &str,
        relation: Option<&str>,
        tenant_id: &str,
    ) -> Result<Vec<TupleRecord>> {
        let now = now_ms();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM rebac_tuples \
                 WHERE object_type = ?1 AND object_id = ?2 \
                 AND (?3 IS NULL OR relation = ?3) \
                 AND (tenant_id = ?4 OR (subject_type = '*' AND subject_id = '*')) \
                 AND (expires_at IS NULL OR expires_at > ?5) \
                 ORDER BY created_at",
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map(
                params![object_type, object_id, relation, tenant_id, now],
                row_to_tuple,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }

    /// Forward walk: live tuples held by a subject (plus wildcard grants)
    ///
    /// Used by the mount resolver to derive the subject's readable object
    /// set in one query.
    pub fn list_subject_tuples(
        &self,
        subject_type: &str,
        subject_id: &str,
        object_type: Option<&str>,
        tenant_id: &str,
    ) -> Result<Vec<TupleRecord>> {
        let now = now_ms();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM rebac_tuples \
                 WHERE (?1 IS NULL OR object_type = ?1) \
                 AND (expires_at IS NULL OR expires_at > ?2) \
                 AND ((subject_type = ?3 AND subject_id = ?4 AND tenant_id = ?5) \
                   OR (subject_type = '*' AND subject_id = '*')) \
                 ORDER BY object_id",
            )
            .map_err(db_err)?;
        let result = stmt
            .query_map(
                params![object_type, now, subject_type, subject_id, tenant_id],
                row_to_tuple,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(subject: (&str, &str), relation: &str, object: (&str, &str), tenant: &str) -> NewTuple {
        NewTuple {
            subject_type: subject.0.to_string(),
            subject_id: subject.1.to_string(),
            subject_relation: None,
            relation: relation.to_string(),
            object_type: object.0.to_string(),
            object_id: object.1.to_string(),
            tenant_id: tenant.to_string(),
            conditions: None,
            expires_at: None,
        }
    }

    /// Direct-leaf probe the way the engine consumes the reverse walk:
    /// any live tuple on the object whose subject is the caller (within
    /// the tenant) or the wildcard
    fn grants_directly(
        store: &RecordStore,
        subject: (&str, &str),
        relation: &str,
        object: (&str, &str),
        tenant: &str,
    ) -> bool {
        store
            .list_object_tuples(object.0, object.1, Some(relation), tenant)
            .unwrap()
            .iter()
            .any(|t| {
                (t.subject_type == "*" && t.subject_id == "*")
                    || (t.subject_type == subject.0
                        && t.subject_id == subject.1
                        && t.tenant_id == tenant)
            })
    }

    #[test]
    fn test_insert_and_direct_lookup() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .insert_tuple(&tuple(("user", "alice"), "viewer", ("file", "/a"), "t1"))
            .unwrap();

        assert!(grants_directly(&store, ("user", "alice"), "viewer", ("file", "/a"), "t1"));
        // Different user, relation, or tenant: no match
        assert!(!grants_directly(&store, ("user", "bob"), "viewer", ("file", "/a"), "t1"));
        assert!(!grants_directly(&store, ("user", "alice"), "editor", ("file", "/a"), "t1"));
        assert!(!grants_directly(&store, ("user", "alice"), "viewer", ("file", "/a"), "t2"));
    }

    #[test]
    fn test_wildcard_matches_across_tenants() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .insert_tuple(&tuple(("*", "*"), "viewer", ("file", "/pub.txt"), "t_a"))
            .unwrap();

        // Any subject, any tenant
        assert!(grants_directly(
            &store,
            ("user", "u"),
            "viewer",
            ("file", "/pub.txt"),
            "t_b"
        ));
    }

    #[test]
    fn test_expired_tuple_invisible() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut t = tuple(("user", "alice"), "viewer", ("file", "/a"), "t1");
        t.expires_at = Some(now_ms() - 10_000);
        store.insert_tuple(&t).unwrap();

        assert!(store
            .list_object_tuples("file", "/a", Some("viewer"), "t1")
            .unwrap()
            .is_empty());
        assert!(store
            .list_subject_tuples("user", "alice", Some("file"), "t1")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_by_id_and_shape() {
        let store = RecordStore::open_in_memory().unwrap();
        let stored = store
            .insert_tuple(&tuple(("user", "alice"), "viewer", ("file", "/a"), "t1"))
            .unwrap();
        assert!(store.delete_tuple(&stored.tuple_id).unwrap());
        assert!(!store.delete_tuple(&stored.tuple_id).unwrap());

        store
            .insert_tuple(&tuple(("user", "bob"), "editor", ("file", "/b"), "t1"))
            .unwrap();
        let n = store
            .delete_tuples_matching("user", "bob", "editor", "file", "/b", "t1")
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_reverse_walk() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .insert_tuple(&tuple(("folder", "/ws"), "parent", ("file", "/ws/a"), "t1"))
            .unwrap();
        store
            .insert_tuple(&tuple(("user", "alice"), "viewer", ("file", "/ws/a"), "t1"))
            .unwrap();

        let parents = store
            .list_object_tuples("file", "/ws/a", Some("parent"), "t1")
            .unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].subject_type, "folder");
        assert_eq!(parents[0].subject_id, "/ws");
    }

    #[test]
    fn test_forward_walk_includes_wildcard_grants() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .insert_tuple(&tuple(("user", "alice"), "viewer", ("file", "/mine"), "t1"))
            .unwrap();
        store
            .insert_tuple(&tuple(("*", "*"), "viewer", ("file", "/pub"), "t2"))
            .unwrap();

        let rows = store
            .list_subject_tuples("user", "alice", Some("file"), "t1")
            .unwrap();
        let objects: Vec<&str> = rows.iter().map(|t| t.object_id.as_str()).collect();
        assert!(objects.contains(&"/mine"));
        assert!(objects.contains(&"/pub"));
    }
}
