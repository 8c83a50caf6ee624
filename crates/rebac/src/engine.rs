//! ReBAC engine: userset-rewrite evaluation with graph limits
//!
//! The authority on "may subject S perform permission P on object O within
//! tenant Z". Resolution walks the namespace's rewrite tree against the
//! tuple store, short-circuiting Boolean nodes and recursing through
//! tuple-to-userset edges. Hard ceilings bound every traversal; hitting
//! one fails closed with an indeterminate result that is never cached.
//!
//! ## Caching
//!
//! The L1 decision cache keys on `(subject, permission, object, tenant,
//! revision_bucket)`. Tuple writes bump the zone revision, so every cached
//! entry from the previous bucket is keyed into irrelevance rather than
//! explicitly purged.
//!
//! ## Locking
//!
//! The engine holds no lock across a tuple-store read; cache access is a
//! short moka critical section per entry.

use crate::namespace::{NamespaceRegistry, Rewrite};
use nexus_core::{
    ConsistencyToken, LimitType, NexusError, ObjectRef, RebacConfig, Result, Subject,
    TokenCodec, ZoneId,
};
use nexus_locks::RevisionCounter;
use nexus_records::{NewTuple, RecordStore, TupleRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Freshness requirement for a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// Serve a cache hit if fresh (eventual)
    MinimizeLatency,
    /// Require state at least as fresh as this revision
    AtLeastAsFresh(u64),
    /// Bypass the cache entirely
    FullyConsistent,
}

/// Which ceiling a traversal hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitInfo {
    pub limit_type: LimitType,
    pub limit_value: u64,
    pub actual_value: u64,
}

/// Outcome of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Definite allow; false when denied or indeterminate
    pub allowed: bool,
    /// True when a graph ceiling prevented a definite answer
    pub indeterminate: bool,
    /// The ceiling that was hit, when indeterminate
    pub limit_exceeded: Option<LimitInfo>,
    /// Zone revision observed by this check
    pub revision: u64,
    /// Whether the answer came from the L1 cache
    pub from_cache: bool,
}

impl CheckResult {
    fn definite(allowed: bool, revision: u64, from_cache: bool) -> Self {
        CheckResult {
            allowed,
            indeterminate: false,
            limit_exceeded: None,
            revision,
            from_cache,
        }
    }
}

/// Result of a tuple write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// Id of the stored tuple
    pub tuple_id: String,
    /// Zone revision after the write
    pub revision: u64,
    /// Token downstream reads may present for read-your-writes
    pub consistency_token: String,
}

/// Input for a tuple write through the engine
#[derive(Debug, Clone)]
pub struct TupleInput {
    pub subject: Subject,
    pub relation: String,
    pub object: ObjectRef,
    pub conditions: Option<serde_json::Value>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    subject_type: String,
    subject_id: String,
    permission: String,
    object_type: String,
    object_id: String,
    tenant: String,
    bucket: u64,
}

/// Per-check traversal state enforcing the graph ceilings
struct Traversal<'a> {
    limits: &'a nexus_core::GraphLimits,
    visited: HashSet<(String, String, String)>,
    tuple_queries: u64,
    nodes: u64,
    started: Instant,
    path: Option<String>,
}

impl<'a> Traversal<'a> {
    fn new(limits: &'a nexus_core::GraphLimits, path: Option<String>) -> Self {
        Traversal {
            limits,
            visited: HashSet::new(),
            tuple_queries: 0,
            nodes: 0,
            started: Instant::now(),
            path,
        }
    }

    fn limit(&self, limit_type: LimitType, limit_value: u64, actual_value: u64) -> NexusError {
        NexusError::LimitExceeded {
            limit_type,
            limit_value,
            actual_value,
            path: self.path.clone(),
        }
    }

    fn check_time(&self) -> Result<()> {
        let elapsed = self.started.elapsed().as_millis() as u64;
        if elapsed > self.limits.max_execution_time_ms {
            return Err(self.limit(
                LimitType::ExecutionTime,
                self.limits.max_execution_time_ms,
                elapsed,
            ));
        }
        Ok(())
    }

    /// Enter a node; Ok(false) means the node was already visited
    fn enter(&mut self, depth: u32, object: &ObjectRef, name: &str) -> Result<bool> {
        if depth > self.limits.max_depth {
            return Err(self.limit(LimitType::Depth, self.limits.max_depth as u64, depth as u64));
        }
        self.check_time()?;
        self.nodes += 1;
        if self.nodes > self.limits.max_visited_nodes as u64 {
            return Err(self.limit(
                LimitType::VisitedNodes,
                self.limits.max_visited_nodes as u64,
                self.nodes,
            ));
        }
        Ok(self.visited.insert((
            object.object_type.clone(),
            object.object_id.clone(),
            name.to_string(),
        )))
    }

    fn record_query(&mut self) -> Result<()> {
        self.tuple_queries += 1;
        if self.tuple_queries > self.limits.max_tuple_queries as u64 {
            return Err(self.limit(
                LimitType::TupleQueries,
                self.limits.max_tuple_queries as u64,
                self.tuple_queries,
            ));
        }
        Ok(())
    }

    fn check_fan_out(&self, count: usize) -> Result<()> {
        if count > self.limits.max_fan_out as usize {
            return Err(self.limit(
                LimitType::FanOut,
                self.limits.max_fan_out as u64,
                count as u64,
            ));
        }
        Ok(())
    }
}

/// The ReBAC engine
pub struct RebacEngine {
    records: Arc<RecordStore>,
    revisions: Arc<RevisionCounter>,
    namespaces: NamespaceRegistry,
    config: RebacConfig,
    tokens: TokenCodec,
    l1: Option<moka::sync::Cache<CacheKey, bool>>,
}

impl RebacEngine {
    /// Build an engine over the shared tuple store and revision counter
    pub fn new(
        records: Arc<RecordStore>,
        revisions: Arc<RevisionCounter>,
        namespaces: NamespaceRegistry,
        config: RebacConfig,
        tokens: TokenCodec,
    ) -> Self {
        let l1 = if config.enable_l1_cache {
            Some(
                moka::sync::Cache::builder()
                    .max_capacity(config.cache_maxsize)
                    .time_to_live(std::time::Duration::from_secs(config.cache_ttl_seconds))
                    .build(),
            )
        } else {
            None
        };
        RebacEngine {
            records,
            revisions,
            namespaces,
            config,
            tokens,
            l1,
        }
    }

    /// The shared revision counter
    pub fn revisions(&self) -> &Arc<RevisionCounter> {
        &self.revisions
    }

    /// The shared tuple store
    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    /// Namespace registry in use
    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write a tuple; bumps the zone revision and mints a token
    pub fn write_tuple(&self, input: &TupleInput, zone_id: &ZoneId) -> Result<WriteResult> {
        if input.relation.is_empty() {
            return Err(NexusError::Validation("relation is empty".to_string()));
        }
        if let Some(config) = self.namespaces.get(&input.object.object_type) {
            if !config.relations.contains(&input.relation)
                && !config.permissions.contains_key(&input.relation)
            {
                return Err(NexusError::Validation(format!(
                    "relation {:?} is not declared for object type {:?}",
                    input.relation, input.object.object_type
                )));
            }
        }

        let stored = self.records.insert_tuple(&NewTuple {
            subject_type: input.subject.subject_type.clone(),
            subject_id: input.subject.subject_id.clone(),
            subject_relation: input.subject.subject_relation.clone(),
            relation: input.relation.clone(),
            object_type: input.object.object_type.clone(),
            object_id: input.object.object_id.clone(),
            tenant_id: zone_id.as_str().to_string(),
            conditions: input.conditions.clone(),
            expires_at: input.expires_at,
        })?;
        let revision = self.revisions.bump(zone_id.as_str());
        let token = self
            .tokens
            .encode(&ConsistencyToken::new(zone_id.clone(), revision))?;
        debug!(tuple = stored.tuple_id.as_str(), revision, "tuple written");
        Ok(WriteResult {
            tuple_id: stored.tuple_id,
            revision,
            consistency_token: token,
        })
    }

    /// Delete a tuple by id; bumps the zone revision when something went
    pub fn delete_tuple(&self, tuple_id: &str, zone_id: &ZoneId) -> Result<bool> {
        let deleted = self.records.delete_tuple(tuple_id)?;
        if deleted {
            self.revisions.bump(zone_id.as_str());
        }
        Ok(deleted)
    }

    /// Delete tuples by shape; bumps the zone revision when any went
    pub fn delete_tuples_matching(
        &self,
        subject: &Subject,
        relation: &str,
        object: &ObjectRef,
        zone_id: &ZoneId,
    ) -> Result<usize> {
        let n = self.records.delete_tuples_matching(
            &subject.subject_type,
            &subject.subject_id,
            relation,
            &object.object_type,
            &object.object_id,
            zone_id.as_str(),
        )?;
        if n > 0 {
            self.revisions.bump(zone_id.as_str());
        }
        Ok(n)
    }

    /// Verify a consistency token and return its revision
    pub fn verify_token(&self, token: &str) -> Result<ConsistencyToken> {
        self.tokens.decode(token)
    }

    // ========================================================================
    // Checks
    // ========================================================================

    /// Simple boolean check with default consistency
    pub fn check(
        &self,
        subject: &Subject,
        permission: &str,
        object: &ObjectRef,
        zone_id: &ZoneId,
    ) -> Result<bool> {
        Ok(self
            .check_detailed(
                subject,
                permission,
                object,
                zone_id,
                Consistency::MinimizeLatency,
                None,
            )?
            .allowed)
    }

    /// Batch check preserving input order
    pub fn check_bulk(
        &self,
        subject: &Subject,
        permission: &str,
        objects: &[ObjectRef],
        zone_id: &ZoneId,
    ) -> Result<Vec<bool>> {
        objects
            .iter()
            .map(|object| self.check(subject, permission, object, zone_id))
            .collect()
    }

    /// Full check with consistency control and request context
    ///
    /// Indeterminate results (graph ceilings) come back as
    /// `allowed = false, indeterminate = true` and are never cached.
    pub fn check_detailed(
        &self,
        subject: &Subject,
        permission: &str,
        object: &ObjectRef,
        zone_id: &ZoneId,
        consistency: Consistency,
        context: Option<&HashMap<String, String>>,
    ) -> Result<CheckResult> {
        if subject.subject_id.is_empty() || subject.subject_type.is_empty() {
            return Ok(CheckResult::definite(false, 0, false));
        }

        let revision = self.revisions.get(zone_id.as_str());
        let use_cache = match consistency {
            Consistency::FullyConsistent => false,
            Consistency::AtLeastAsFresh(min) => revision >= min,
            Consistency::MinimizeLatency => true,
        };
        let bucket = revision / self.config.revision_window.max(1);
        let key = CacheKey {
            subject_type: subject.subject_type.clone(),
            subject_id: subject.subject_id.clone(),
            permission: permission.to_string(),
            object_type: object.object_type.clone(),
            object_id: object.object_id.clone(),
            tenant: zone_id.as_str().to_string(),
            bucket,
        };

        if use_cache {
            if let Some(cache) = &self.l1 {
                if let Some(allowed) = cache.get(&key) {
                    return Ok(CheckResult::definite(allowed, revision, true));
                }
            }
        }

        let mut traversal = Traversal::new(&self.config.limits, Some(object.object_id.clone()));
        match self.eval(subject, permission, object, zone_id, 0, &mut traversal, context) {
            Ok(allowed) => {
                if let Some(cache) = &self.l1 {
                    cache.insert(key, allowed);
                }
                Ok(CheckResult::definite(allowed, revision, false))
            }
            Err(NexusError::LimitExceeded {
                limit_type,
                limit_value,
                actual_value,
                ..
            }) => Ok(CheckResult {
                allowed: false,
                indeterminate: true,
                limit_exceeded: Some(LimitInfo {
                    limit_type,
                    limit_value,
                    actual_value,
                }),
                revision,
                from_cache: false,
            }),
            Err(e) => Err(e),
        }
    }

    /// Evaluate a relation or permission name on an object
    fn eval(
        &self,
        subject: &Subject,
        name: &str,
        object: &ObjectRef,
        zone_id: &ZoneId,
        depth: u32,
        traversal: &mut Traversal<'_>,
        context: Option<&HashMap<String, String>>,
    ) -> Result<bool> {
        if !traversal.enter(depth, object, name)? {
            // Already visited on this walk: cycle or repeated node
            return Ok(false);
        }

        let tree = match self.namespaces.get(&object.object_type) {
            Some(config) => match config.resolve(name) {
                Some(tree) => tree,
                None => return Ok(false),
            },
            // Unconfigured object types fall back to direct-tuple checks
            None => Rewrite::This,
        };
        self.eval_tree(&tree, subject, name, object, zone_id, depth, traversal, context)
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_tree(
        &self,
        tree: &Rewrite,
        subject: &Subject,
        name: &str,
        object: &ObjectRef,
        zone_id: &ZoneId,
        depth: u32,
        traversal: &mut Traversal<'_>,
        context: Option<&HashMap<String, String>>,
    ) -> Result<bool> {
        match tree {
            Rewrite::This => {
                self.direct_check(subject, name, object, zone_id, depth, traversal, context)
            }
            Rewrite::ComputedUserset(other) => {
                self.eval(subject, other, object, zone_id, depth + 1, traversal, context)
            }
            Rewrite::TupleToUserset { tupleset, computed } => {
                traversal.record_query()?;
                let parents = self.records.list_object_tuples(
                    &object.object_type,
                    &object.object_id,
                    Some(tupleset),
                    zone_id.as_str(),
                )?;
                traversal.check_fan_out(parents.len())?;
                for parent in parents {
                    let parent_object =
                        ObjectRef::new(parent.subject_type.clone(), parent.subject_id.clone());
                    if self.eval(
                        subject,
                        computed,
                        &parent_object,
                        zone_id,
                        depth + 1,
                        traversal,
                        context,
                    )? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rewrite::Union(children) => {
                for child in children {
                    if self.eval_tree(
                        child, subject, name, object, zone_id, depth, traversal, context,
                    )? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rewrite::Intersection(children) => {
                for child in children {
                    if !self.eval_tree(
                        child, subject, name, object, zone_id, depth, traversal, context,
                    )? {
                        return Ok(false);
                    }
                }
                Ok(!children.is_empty())
            }
            Rewrite::Exclusion(base, subtract) => {
                let base_holds = self.eval_tree(
                    base, subject, name, object, zone_id, depth, traversal, context,
                )?;
                if !base_holds {
                    return Ok(false);
                }
                let subtracted = self.eval_tree(
                    subtract, subject, name, object, zone_id, depth, traversal, context,
                )?;
                Ok(!subtracted)
            }
        }
    }

    /// Leaf evaluation: live tuples on the object with this relation
    #[allow(clippy::too_many_arguments)]
    fn direct_check(
        &self,
        subject: &Subject,
        relation: &str,
        object: &ObjectRef,
        zone_id: &ZoneId,
        depth: u32,
        traversal: &mut Traversal<'_>,
        context: Option<&HashMap<String, String>>,
    ) -> Result<bool> {
        traversal.record_query()?;
        let tuples = self.records.list_object_tuples(
            &object.object_type,
            &object.object_id,
            Some(relation),
            zone_id.as_str(),
        )?;
        traversal.check_fan_out(tuples.len())?;

        for tuple in tuples {
            if !conditions_match(&tuple, context) {
                continue;
            }
            let subject_matches = tuple.subject_type == "*" && tuple.subject_id == "*"
                || (tuple.subject_type == subject.subject_type
                    && tuple.subject_id == subject.subject_id
                    && tuple.subject_relation.is_none());
            if subject_matches {
                return Ok(true);
            }
            // Userset subject (e.g. group#member): recurse into the
            // referenced userset
            if let Some(subject_relation) = &tuple.subject_relation {
                if tuple.subject_type != "*" {
                    let userset_object =
                        ObjectRef::new(tuple.subject_type.clone(), tuple.subject_id.clone());
                    if self.eval(
                        subject,
                        subject_relation,
                        &userset_object,
                        zone_id,
                        depth + 1,
                        traversal,
                        context,
                    )? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }
}

/// Evaluate a tuple's conditions against the request context
///
/// Conditions are a flat JSON object of required key/value pairs; a tuple
/// with conditions only grants when every pair is present in the context.
fn conditions_match(tuple: &TupleRecord, context: Option<&HashMap<String, String>>) -> bool {
    let Some(raw) = &tuple.conditions else {
        return true;
    };
    let Ok(serde_json::Value::Object(required)) =
        serde_json::from_str::<serde_json::Value>(raw)
    else {
        // Malformed conditions never grant
        return false;
    };
    if required.is_empty() {
        return true;
    }
    let Some(context) = context else {
        return false;
    };
    required.iter().all(|(key, expected)| {
        context
            .get(key)
            .map(|actual| match expected {
                serde_json::Value::String(s) => actual == s,
                other => actual == &other.to_string(),
            })
            .unwrap_or(false)
    })
}
