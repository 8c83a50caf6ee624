//! Memory consolidation
//!
//! Batch job that compacts a user's low-importance memories: cluster by
//! semantic + temporal affinity, summarize each cluster through the
//! summarizer port, store one consolidated memory per cluster, and
//! archive the sources under it. The consolidated memory's importance is
//! `min(max(sources) + 0.1, 1.0)`.

use crate::affinity::{cluster_by_affinity, AffinityItem};
use nexus_core::{NexusError, Result};
use nexus_records::{MemoryFilter, MemoryRecord, NewMemory, RecordStore};
use std::sync::Arc;
use tracing::{debug, info};

/// LLM port: the only thing consolidation needs from a model
pub trait Summarizer: Send + Sync {
    /// Produce a consolidated summary from the prompt
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Deterministic fallback summarizer
///
/// Joins the source excerpts; useful offline and in tests.
pub struct ConcatSummarizer;

impl Summarizer for ConcatSummarizer {
    fn complete(&self, prompt: &str) -> Result<String> {
        let body: Vec<&str> = prompt
            .lines()
            .filter(|line| line.starts_with("- "))
            .map(|line| &line[2..])
            .collect();
        Ok(body.join("; "))
    }
}

/// Content port: resolves memory hashes to text and stores summaries
pub trait MemoryContent: Send + Sync {
    /// Load the text behind a content hash
    fn load(&self, content_hash: &str) -> Result<String>;
    /// Store summary text, returning its content hash
    fn store(&self, text: &str) -> Result<String>;
}

/// Consolidation tuning knobs
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Only memories at or below this importance are candidates
    pub importance_threshold: f64,
    /// Minimum affinity for a merge
    pub affinity_threshold: f32,
    /// Semantic weight in the affinity blend
    pub beta: f32,
    /// Temporal decay per hour of separation
    pub lambda: f64,
    /// Most memories considered per run
    pub max_batch: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        ConsolidationConfig {
            importance_threshold: 0.5,
            affinity_threshold: 0.6,
            beta: 0.7,
            lambda: 0.05,
            max_batch: 100,
        }
    }
}

/// Result of one consolidation run
#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    /// Ids of the new consolidated memories
    pub consolidated_ids: Vec<String>,
    /// How many source memories were archived
    pub memories_consolidated: usize,
    /// Clusters that were too small to consolidate
    pub singletons_skipped: usize,
}

/// The consolidation engine
pub struct ConsolidationEngine {
    records: Arc<RecordStore>,
    content: Arc<dyn MemoryContent>,
    summarizer: Arc<dyn Summarizer>,
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    /// Build an engine from its ports
    pub fn new(
        records: Arc<RecordStore>,
        content: Arc<dyn MemoryContent>,
        summarizer: Arc<dyn Summarizer>,
        config: ConsolidationConfig,
    ) -> Self {
        ConsolidationEngine {
            records,
            content,
            summarizer,
            config,
        }
    }

    /// Consolidate one user's low-importance memories
    pub fn consolidate_for_user(&self, user_id: &str) -> Result<ConsolidationReport> {
        let candidates = self.candidates(user_id)?;
        if candidates.len() < 2 {
            return Ok(ConsolidationReport::default());
        }

        let items: Vec<AffinityItem> = candidates
            .iter()
            .filter_map(|memory| {
                let embedding: Vec<f32> =
                    serde_json::from_str(memory.embedding_json.as_deref()?).ok()?;
                Some(AffinityItem {
                    id: memory.memory_id.clone(),
                    embedding,
                    timestamp_ms: memory.valid_at.unwrap_or(memory.created_at),
                })
            })
            .collect();
        if items.len() < 2 {
            return Ok(ConsolidationReport::default());
        }

        let clusters = cluster_by_affinity(
            &items,
            self.config.affinity_threshold,
            self.config.beta,
            self.config.lambda,
        );

        let by_id: std::collections::HashMap<&str, &MemoryRecord> = candidates
            .iter()
            .map(|m| (m.memory_id.as_str(), m))
            .collect();

        let mut report = ConsolidationReport::default();
        for cluster in clusters {
            if cluster.len() < 2 {
                report.singletons_skipped += 1;
                continue;
            }
            let sources: Vec<&MemoryRecord> = cluster
                .iter()
                .map(|&idx| by_id[items[idx].id.as_str()])
                .collect();
            let consolidated = self.consolidate_cluster(user_id, &sources)?;
            report.consolidated_ids.push(consolidated.memory_id);
            report.memories_consolidated += sources.len();
        }

        info!(
            user = user_id,
            clusters = report.consolidated_ids.len(),
            sources = report.memories_consolidated,
            "consolidation run complete"
        );
        Ok(report)
    }

    fn candidates(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        let mut memories = self.records.list_memories(&MemoryFilter {
            user_id: Some(user_id.to_string()),
            ..MemoryFilter::default()
        })?;
        memories.retain(|m| {
            m.importance <= self.config.importance_threshold
                && m.consolidated_from.is_none()
                && !m.is_archived
        });
        memories.truncate(self.config.max_batch);
        Ok(memories)
    }

    fn consolidate_cluster(
        &self,
        user_id: &str,
        sources: &[&MemoryRecord],
    ) -> Result<MemoryRecord> {
        let mut prompt = String::from(
            "Consolidate the following related memories into one concise summary \
             that preserves every durable fact:\n",
        );
        for source in sources {
            let text = self.content.load(&source.content_hash)?;
            prompt.push_str(&format!("- {text}\n"));
        }

        let summary = self.summarizer.complete(&prompt)?;
        if summary.trim().is_empty() {
            return Err(NexusError::backend(
                "consolidation",
                "summarizer returned empty text",
            ));
        }
        let summary_hash = self.content.store(&summary)?;

        let max_importance = sources
            .iter()
            .map(|m| m.importance)
            .fold(f64::MIN, f64::max);
        let importance = (max_importance + 0.1).min(1.0);

        let source_ids: Vec<String> =
            sources.iter().map(|m| m.memory_id.clone()).collect();

        let consolidated = self.records.insert_consolidated_memory(
            &NewMemory {
                content_hash: summary_hash,
                zone_id: sources[0].zone_id.clone(),
                user_id: Some(user_id.to_string()),
                agent_id: None,
                scope: sources[0].scope.clone(),
                visibility: sources[0].visibility.clone(),
                memory_type: None,
                importance,
                namespace: sources[0].namespace.clone(),
                path_key: None,
                valid_at: None,
                change_reason: None,
                entities_json: None,
                embedding_json: None,
            },
            &source_ids,
        )?;

        self.records
            .archive_memories(&source_ids, &consolidated.memory_id)?;
        debug!(
            consolidated = consolidated.memory_id.as_str(),
            sources = source_ids.len(),
            importance,
            "cluster consolidated"
        );
        Ok(consolidated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryInput, MemoryStore};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory content port for tests
    struct MapContent {
        texts: Mutex<HashMap<String, String>>,
    }

    impl MapContent {
        fn new() -> Self {
            MapContent {
                texts: Mutex::new(HashMap::new()),
            }
        }

        fn seed(&self, hash: &str, text: &str) {
            self.texts
                .lock()
                .insert(hash.to_string(), text.to_string());
        }
    }

    impl MemoryContent for MapContent {
        fn load(&self, content_hash: &str) -> Result<String> {
            self.texts
                .lock()
                .get(content_hash)
                .cloned()
                .ok_or_else(|| NexusError::NotFound(format!("content {content_hash}")))
        }

        fn store(&self, text: &str) -> Result<String> {
            let hash = format!("sum-{}", self.texts.lock().len());
            self.seed(&hash, text);
            Ok(hash)
        }
    }

    fn seed_memory(
        store: &MemoryStore,
        content: &MapContent,
        hash: &str,
        text: &str,
        importance: f64,
        embedding: &[f32],
        valid_at: i64,
    ) -> MemoryRecord {
        content.seed(hash, text);
        let mut input = MemoryInput::new(hash, "u1")
            .with_importance(importance)
            .with_embedding(embedding);
        input.valid_at = Some(valid_at);
        store.create(input).unwrap()
    }

    fn engine(records: Arc<RecordStore>, content: Arc<MapContent>) -> ConsolidationEngine {
        ConsolidationEngine::new(
            records,
            content,
            Arc::new(ConcatSummarizer),
            ConsolidationConfig::default(),
        )
    }

    #[test]
    fn test_consolidates_similar_cluster() {
        let records = Arc::new(RecordStore::open_in_memory().unwrap());
        let store = MemoryStore::new(Arc::clone(&records));
        let content = Arc::new(MapContent::new());

        let a = seed_memory(&store, &content, "h1", "likes rust", 0.3, &[1.0, 0.0], 0);
        let b = seed_memory(&store, &content, "h2", "enjoys cargo", 0.4, &[0.97, 0.05], 60_000);
        // Far away in meaning and time: stays alone
        let c = seed_memory(
            &store,
            &content,
            "h3",
            "allergic to peanuts",
            0.3,
            &[0.0, 1.0],
            5_000 * 3_600_000,
        );

        let report = engine(Arc::clone(&records), Arc::clone(&content))
            .consolidate_for_user("u1")
            .unwrap();

        assert_eq!(report.consolidated_ids.len(), 1);
        assert_eq!(report.memories_consolidated, 2);
        assert_eq!(report.singletons_skipped, 1);

        // Sources archived, floored, and linked to the parent
        let parent_id = &report.consolidated_ids[0];
        for source_id in [&a.memory_id, &b.memory_id] {
            let source = records.get_memory(source_id).unwrap().unwrap();
            assert!(source.is_archived);
            assert_eq!(source.importance, 0.1);
            assert_eq!(source.parent_memory_id.as_deref(), Some(parent_id.as_str()));
        }
        let untouched = records.get_memory(&c.memory_id).unwrap().unwrap();
        assert!(!untouched.is_archived);

        // Consolidated memory: importance = min(max(sources) + 0.1, 1)
        let parent = records.get_memory(parent_id).unwrap().unwrap();
        assert!((parent.importance - 0.5).abs() < 1e-9);
        assert_eq!(
            parent.consolidated_from.as_ref().unwrap().len(),
            2
        );
        let summary = content.load(&parent.content_hash).unwrap();
        assert!(summary.contains("likes rust"));
        assert!(summary.contains("enjoys cargo"));
    }

    #[test]
    fn test_importance_capped_at_one() {
        let records = Arc::new(RecordStore::open_in_memory().unwrap());
        let store = MemoryStore::new(Arc::clone(&records));
        let content = Arc::new(MapContent::new());

        seed_memory(&store, &content, "h1", "fact one", 0.5, &[1.0, 0.0], 0);
        seed_memory(&store, &content, "h2", "fact two", 0.5, &[1.0, 0.01], 1_000);

        let mut config = ConsolidationConfig::default();
        config.importance_threshold = 0.95;
        let engine = ConsolidationEngine::new(
            Arc::clone(&records),
            Arc::clone(&content),
            Arc::new(ConcatSummarizer),
            config,
        );
        let report = engine.consolidate_for_user("u1").unwrap();
        let parent = records
            .get_memory(&report.consolidated_ids[0])
            .unwrap()
            .unwrap();
        assert!(parent.importance <= 1.0);
        assert!((parent.importance - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_high_importance_memories_left_alone() {
        let records = Arc::new(RecordStore::open_in_memory().unwrap());
        let store = MemoryStore::new(Arc::clone(&records));
        let content = Arc::new(MapContent::new());

        seed_memory(&store, &content, "h1", "vital fact", 0.9, &[1.0, 0.0], 0);
        seed_memory(&store, &content, "h2", "vital fact 2", 0.95, &[1.0, 0.0], 0);

        let report = engine(Arc::clone(&records), content)
            .consolidate_for_user("u1")
            .unwrap();
        assert!(report.consolidated_ids.is_empty());
    }

    #[test]
    fn test_consolidated_memories_not_reconsolidated() {
        let records = Arc::new(RecordStore::open_in_memory().unwrap());
        let store = MemoryStore::new(Arc::clone(&records));
        let content = Arc::new(MapContent::new());

        seed_memory(&store, &content, "h1", "alpha", 0.3, &[1.0, 0.0], 0);
        seed_memory(&store, &content, "h2", "beta", 0.3, &[1.0, 0.0], 0);

        let eng = engine(Arc::clone(&records), Arc::clone(&content));
        let first = eng.consolidate_for_user("u1").unwrap();
        assert_eq!(first.consolidated_ids.len(), 1);

        // Second run finds only the consolidated row (excluded) and the
        // archived sources (excluded): nothing to do
        let second = eng.consolidate_for_user("u1").unwrap();
        assert!(second.consolidated_ids.is_empty());
    }
}
