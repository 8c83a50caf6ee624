//! Namespace / mount resolver
//!
//! For each subject, derives the sorted list of mount paths (object paths
//! directly readable, including wildcard grants) and answers visibility
//! questions in O(log n) by binary-searching the pre-computed table. Two
//! decision caches (dcache) sit in front: positive entries live longer
//! than negative ones, and both embed the zone's revision bucket in their
//! key, so a revision roll invalidates by mismatch instead of purge.

use crate::namespace::NamespaceRegistry;
use nexus_core::{ResolverConfig, Result, Subject};
use nexus_locks::RevisionCounter;
use nexus_records::RecordStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct MountKey {
    subject_type: String,
    subject_id: String,
    zone_id: String,
    bucket: u64,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct DecisionKey {
    subject_type: String,
    subject_id: String,
    path: String,
    zone_id: String,
    bucket: u64,
}

/// Counters exposed for observability and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverMetrics {
    pub dcache_hits: u64,
    pub dcache_misses: u64,
    pub dcache_negative_hits: u64,
    pub dcache_positive_size: u64,
    pub dcache_negative_size: u64,
}

/// Per-subject visibility resolver with dcache
pub struct NamespaceResolver {
    records: Arc<RecordStore>,
    revisions: Arc<RevisionCounter>,
    namespaces: NamespaceRegistry,
    config: ResolverConfig,
    mounts: moka::sync::Cache<MountKey, Arc<Vec<String>>>,
    dcache_positive: moka::sync::Cache<DecisionKey, ()>,
    dcache_negative: moka::sync::Cache<DecisionKey, ()>,
    hits: AtomicU64,
    misses: AtomicU64,
    negative_hits: AtomicU64,
}

impl NamespaceResolver {
    /// Build a resolver over the shared tuple store and revision counter
    pub fn new(
        records: Arc<RecordStore>,
        revisions: Arc<RevisionCounter>,
        namespaces: NamespaceRegistry,
        config: ResolverConfig,
    ) -> Self {
        let mounts = moka::sync::Cache::builder()
            .max_capacity(config.cache_maxsize)
            .time_to_live(std::time::Duration::from_secs(config.cache_ttl))
            .build();
        let dcache_positive = moka::sync::Cache::builder()
            .max_capacity(config.dcache_maxsize)
            .time_to_live(std::time::Duration::from_secs(config.dcache_positive_ttl))
            .build();
        let dcache_negative = moka::sync::Cache::builder()
            .max_capacity(config.dcache_maxsize)
            .time_to_live(std::time::Duration::from_secs(config.dcache_negative_ttl))
            .build();
        NamespaceResolver {
            records,
            revisions,
            namespaces,
            config,
            mounts,
            dcache_positive,
            dcache_negative,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            negative_hits: AtomicU64::new(0),
        }
    }

    fn bucket(&self, zone_id: &str) -> u64 {
        self.revisions.bucket(zone_id, self.config.revision_window)
    }

    /// The sorted mount table for a subject in a zone
    ///
    /// Mount paths are the object ids of live tuples whose relation
    /// implies `read` under the `file` namespace, wildcard grants
    /// included. The slice is cached per `(subject, zone, bucket)` so hot
    /// visibility checks do not rebuild or allocate.
    pub fn mount_paths(&self, subject: &Subject, zone_id: &str) -> Result<Arc<Vec<String>>> {
        let key = MountKey {
            subject_type: subject.subject_type.clone(),
            subject_id: subject.subject_id.clone(),
            zone_id: zone_id.to_string(),
            bucket: self.bucket(zone_id),
        };
        if let Some(cached) = self.mounts.get(&key) {
            return Ok(cached);
        }

        let read_implying: HashSet<String> = self
            .namespaces
            .get("file")
            .map(|config| config.relations_implying("read"))
            .unwrap_or_default();

        let tuples = self.records.list_subject_tuples(
            &subject.subject_type,
            &subject.subject_id,
            Some("file"),
            zone_id,
        )?;
        let mut paths: Vec<String> = tuples
            .into_iter()
            .filter(|t| read_implying.contains(&t.relation))
            .map(|t| t.object_id)
            .collect();
        paths.sort();
        paths.dedup();

        let data = Arc::new(paths);
        self.mounts.insert(key, Arc::clone(&data));
        Ok(data)
    }

    /// Is `path` visible to the subject?
    ///
    /// Visible iff it equals a mount path or lies underneath one. Serves
    /// from the dcache when possible; a miss bisects the mount table and
    /// populates the cache with the polarity-appropriate TTL.
    pub fn is_visible(&self, subject: &Subject, path: &str, zone_id: &str) -> Result<bool> {
        let key = DecisionKey {
            subject_type: subject.subject_type.clone(),
            subject_id: subject.subject_id.clone(),
            path: path.to_string(),
            zone_id: zone_id.to_string(),
            bucket: self.bucket(zone_id),
        };
        if self.dcache_positive.get(&key).is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(true);
        }
        if self.dcache_negative.get(&key).is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.negative_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mounts = self.mount_paths(subject, zone_id)?;
        let visible = bisect_visible(&mounts, path);
        if visible {
            self.dcache_positive.insert(key, ());
        } else {
            self.dcache_negative.insert(key, ());
        }
        Ok(visible)
    }

    /// Filter a path list down to the visible ones, preserving order
    ///
    /// Populates the dcache so an identical second call is all hits.
    pub fn filter_visible(
        &self,
        subject: &Subject,
        paths: &[String],
        zone_id: &str,
    ) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for path in paths {
            if self.is_visible(subject, path, zone_id)? {
                out.push(path.clone());
            }
        }
        Ok(out)
    }

    /// Metrics snapshot
    pub fn metrics(&self) -> ResolverMetrics {
        self.dcache_positive.run_pending_tasks();
        self.dcache_negative.run_pending_tasks();
        ResolverMetrics {
            dcache_hits: self.hits.load(Ordering::Relaxed),
            dcache_misses: self.misses.load(Ordering::Relaxed),
            dcache_negative_hits: self.negative_hits.load(Ordering::Relaxed),
            dcache_positive_size: self.dcache_positive.entry_count(),
            dcache_negative_size: self.dcache_negative.entry_count(),
        }
    }
}

/// Binary-search visibility over a sorted mount table
///
/// `path` is visible iff it equals a mount or one of its ancestors is a
/// mount. Each ancestor probe is one binary search, so the whole check is
/// O(segments · log n) with no allocation.
pub fn bisect_visible(mounts: &[String], path: &str) -> bool {
    if mounts.is_empty() {
        return false;
    }
    if mounts.binary_search_by(|m| m.as_str().cmp(path)).is_ok() {
        return true;
    }
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        let ancestor = if idx == 0 { "/" } else { &current[..idx] };
        if mounts
            .binary_search_by(|m| m.as_str().cmp(ancestor))
            .is_ok()
        {
            return true;
        }
        if idx == 0 {
            break;
        }
        current = ancestor;
    }
    false
}

/// Reference implementation used to validate the bisect path
pub fn scan_visible(mounts: &[String], path: &str) -> bool {
    mounts.iter().any(|m| {
        m == path || m == "/" || path.starts_with(&format!("{m}/"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_records::NewTuple;

    fn resolver_with(config: ResolverConfig) -> NamespaceResolver {
        NamespaceResolver::new(
            Arc::new(RecordStore::open_in_memory().unwrap()),
            Arc::new(RevisionCounter::new()),
            NamespaceRegistry::builtin(),
            config,
        )
    }

    fn resolver() -> NamespaceResolver {
        resolver_with(ResolverConfig::default())
    }

    fn grant(resolver: &NamespaceResolver, subject: (&str, &str), relation: &str, path: &str, zone: &str) {
        resolver
            .records
            .insert_tuple(&NewTuple {
                subject_type: subject.0.to_string(),
                subject_id: subject.1.to_string(),
                subject_relation: None,
                relation: relation.to_string(),
                object_type: "file".to_string(),
                object_id: path.to_string(),
                tenant_id: zone.to_string(),
                conditions: None,
                expires_at: None,
            })
            .unwrap();
        resolver.revisions.bump(zone);
    }

    #[test]
    fn test_mount_paths_sorted_and_deduped() {
        let r = resolver();
        grant(&r, ("user", "alice"), "reader", "/z", "t1");
        grant(&r, ("user", "alice"), "reader", "/a", "t1");
        grant(&r, ("user", "alice"), "writer", "/a", "t1");
        // parent tuples do not imply read directly
        grant(&r, ("user", "alice"), "parent", "/p", "t1");

        let mounts = r.mount_paths(&Subject::user("alice"), "t1").unwrap();
        assert_eq!(mounts.as_slice(), ["/a", "/z"]);
    }

    #[test]
    fn test_is_visible_prefix_semantics() {
        let r = resolver();
        grant(&r, ("user", "alice"), "reader", "/workspace/proj", "t1");

        let alice = Subject::user("alice");
        assert!(r.is_visible(&alice, "/workspace/proj", "t1").unwrap());
        assert!(r.is_visible(&alice, "/workspace/proj/a.txt", "t1").unwrap());
        assert!(r
            .is_visible(&alice, "/workspace/proj/sub/deep.txt", "t1")
            .unwrap());
        assert!(!r.is_visible(&alice, "/workspace/project", "t1").unwrap());
        assert!(!r.is_visible(&alice, "/workspace", "t1").unwrap());
        assert!(!r.is_visible(&alice, "/secret/b.txt", "t1").unwrap());
    }

    #[test]
    fn test_filter_visible_preserves_order_and_primes_dcache() {
        // Seeded scenario: filter then 100% hits on the second call
        let r = resolver();
        grant(&r, ("user", "alice"), "reader", "/workspace/proj/a.txt", "t1");
        grant(&r, ("user", "alice"), "reader", "/workspace/proj/c.txt", "t1");

        let alice = Subject::user("alice");
        let paths: Vec<String> = [
            "/workspace/proj/a.txt",
            "/secret/b.txt",
            "/workspace/proj/c.txt",
            "/other/d.txt",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let visible = r.filter_visible(&alice, &paths, "t1").unwrap();
        assert_eq!(
            visible,
            vec![
                "/workspace/proj/a.txt".to_string(),
                "/workspace/proj/c.txt".to_string()
            ]
        );
        let after_first = r.metrics();
        assert_eq!(after_first.dcache_misses, 4);
        assert_eq!(after_first.dcache_hits, 0);

        // Second identical call: 4/4 dcache hits
        let again = r.filter_visible(&alice, &paths, "t1").unwrap();
        assert_eq!(again, visible);
        let after_second = r.metrics();
        assert_eq!(after_second.dcache_misses, 4);
        assert_eq!(after_second.dcache_hits, 4);
        assert_eq!(after_second.dcache_negative_hits, 2);
    }

    #[test]
    fn test_revision_roll_invalidates_by_key() {
        let r = resolver();
        let alice = Subject::user("alice");
        assert!(!r.is_visible(&alice, "/doc", "t1").unwrap());
        assert_eq!(r.metrics().dcache_misses, 1);

        // Grant arrives; the bump moves the bucket, old negative entry is
        // keyed out, and the fresh bisect sees the mount
        grant(&r, ("user", "alice"), "reader", "/doc", "t1");
        assert!(r.is_visible(&alice, "/doc", "t1").unwrap());
        assert_eq!(r.metrics().dcache_misses, 2);
    }

    #[test]
    fn test_wildcard_mounts_visible_to_everyone() {
        let r = resolver();
        grant(&r, ("*", "*"), "reader", "/pub", "t1");
        assert!(r
            .is_visible(&Subject::user("anyone"), "/pub/readme.md", "t1")
            .unwrap());
    }

    #[test]
    fn test_metrics_sizes() {
        let r = resolver();
        grant(&r, ("user", "alice"), "reader", "/a", "t1");
        let alice = Subject::user("alice");
        r.is_visible(&alice, "/a", "t1").unwrap();
        r.is_visible(&alice, "/nope", "t1").unwrap();
        let m = r.metrics();
        assert_eq!(m.dcache_positive_size, 1);
        assert_eq!(m.dcache_negative_size, 1);
    }

    #[test]
    fn test_bisect_matches_scan() {
        let mounts: Vec<String> = ["/a", "/a/b", "/ws/proj", "/zz"]
            .into_iter()
            .map(String::from)
            .collect();
        for path in [
            "/a", "/a/x", "/a/b/c", "/ws", "/ws/proj", "/ws/proj/f.txt", "/ws/projx", "/zz",
            "/zzz", "/", "/q",
        ] {
            assert_eq!(
                bisect_visible(&mounts, path),
                scan_visible(&mounts, path),
                "mismatch for {path}"
            );
        }
    }

    #[test]
    fn test_root_mount_sees_everything() {
        let mounts = vec!["/".to_string()];
        assert!(bisect_visible(&mounts, "/anything/at/all"));
        assert!(scan_visible(&mounts, "/anything/at/all"));
    }

    proptest::proptest! {
        #[test]
        fn prop_bisect_equals_scan(
            mount_idx in proptest::collection::vec(0usize..20, 0..8),
            probe_idx in 0usize..40,
            extra in "[a-c]{0,2}",
        ) {
            // Build mounts and probes from a tiny path alphabet so
            // collisions and prefixes actually happen
            let universe: Vec<String> = (0..20)
                .map(|i| format!("/d{}/s{}", i % 4, i))
                .collect();
            let mut mounts: Vec<String> =
                mount_idx.iter().map(|&i| universe[i].clone()).collect();
            mounts.sort();
            mounts.dedup();

            let probe = format!("{}/{extra}", universe[probe_idx % 20].clone());
            proptest::prop_assert_eq!(
                bisect_visible(&mounts, &probe),
                scan_visible(&mounts, &probe)
            );
            let direct = &universe[probe_idx % 20];
            proptest::prop_assert_eq!(
                bisect_visible(&mounts, direct),
                scan_visible(&mounts, direct)
            );
        }
    }
}
