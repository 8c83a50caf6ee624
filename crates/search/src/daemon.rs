//! Hot search daemon
//!
//! Long-running component that keeps the keyword and vector indexes warm
//! so first queries pay no cold-start cost. Startup bulk-loads every
//! document chunk from the record store, warms the database connection,
//! and issues one dummy vector query; all durations land in
//! [`DaemonStats`].
//!
//! File changes arrive through [`SearchDaemon::notify_file_change`] into a
//! pending set; a background task flushes batches every
//! `refresh_debounce_seconds`. Query latencies feed a bounded ring buffer
//! exposing `avg_latency_ms` / `p99_latency_ms` for health endpoints.

use crate::fusion::fuse;
use crate::index::KeywordIndex;
use crate::trigram::TrigramBackend;
use crate::types::{DocId, Document, FusionMethod, SearchMode, SearchResult};
use crate::vector::{Embedder, VectorIndex};
use nexus_core::{DaemonConfig, NexusError, Result};
use nexus_records::RecordStore;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Kind of file change reported to the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// Warm-up and query statistics
#[derive(Debug, Clone, Default)]
pub struct DaemonStats {
    /// Keyword index bulk-load duration
    pub keyword_load_ms: f64,
    /// Database warm-up duration
    pub db_warm_ms: f64,
    /// Vector index warm-up duration
    pub vector_warm_ms: f64,
    /// Chunks indexed at startup
    pub documents_indexed: usize,
    /// Mean query latency over the ring buffer
    pub avg_latency_ms: f64,
    /// 99th-percentile query latency over the ring buffer
    pub p99_latency_ms: f64,
}

const MAX_LATENCY_SAMPLES: usize = 1_000;

/// The search daemon
pub struct SearchDaemon {
    config: DaemonConfig,
    records: Arc<RecordStore>,
    keyword: Arc<KeywordIndex>,
    vectors: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    trigram: Option<Arc<dyn TrigramBackend>>,
    stats: RwLock<DaemonStats>,
    latencies: Mutex<VecDeque<f64>>,
    pending: Arc<Mutex<HashSet<String>>>,
    initialized: AtomicBool,
    running: Arc<AtomicBool>,
    shutdown: Arc<tokio::sync::Notify>,
}

/// Index one chunk into both indexes
///
/// Chunks without a stored embedding (or with one of the wrong
/// dimension) are embedded on the fly.
fn index_chunk(
    keyword: &KeywordIndex,
    vectors: &VectorIndex,
    embedder: &dyn Embedder,
    document: &Document,
) -> Result<()> {
    let doc_id = DocId::new(&document.path, document.chunk_index);
    keyword.index_document(&doc_id, &document.text);

    let embedding = match &document.embedding {
        Some(v) if v.len() == vectors.dimension() => v.clone(),
        Some(v) => {
            warn!(
                doc = %doc_id,
                got = v.len(),
                want = vectors.dimension(),
                "stored embedding has wrong dimension; re-embedding"
            );
            embedder.embed(&document.text)?
        }
        None => embedder.embed(&document.text)?,
    };
    vectors.upsert(doc_id, embedding)?;
    Ok(())
}

/// Re-index a batch of paths from the record store
///
/// A path whose live file no longer has chunks (deleted or renamed away)
/// is dropped from both indexes.
fn refresh_paths(
    records: &RecordStore,
    keyword: &KeywordIndex,
    vectors: &VectorIndex,
    embedder: &dyn Embedder,
    paths: Vec<String>,
) -> usize {
    let mut refreshed = 0;
    for path in paths {
        match records.chunks_for_path(&path) {
            Ok(chunks) => {
                keyword.remove_path(&path);
                vectors.remove_path(&path);
                for chunk in chunks {
                    let document = Document {
                        path: path.clone(),
                        chunk_index: chunk.chunk_index,
                        text: chunk.chunk_text,
                        embedding: chunk.embedding,
                    };
                    if let Err(e) = index_chunk(keyword, vectors, embedder, &document) {
                        warn!(path = path.as_str(), error = %e, "refresh failed");
                    }
                }
                refreshed += 1;
            }
            Err(e) => warn!(path = path.as_str(), error = %e, "refresh lookup failed"),
        }
    }
    refreshed
}

/// Pick the keyword tier: trigram engine when present, BM25 otherwise
///
/// A trigram failure logs and falls back rather than failing the query.
fn keyword_tier(
    trigram: Option<&Arc<dyn TrigramBackend>>,
    keyword: &KeywordIndex,
    query: &str,
    limit: usize,
    path_filter: Option<&str>,
) -> Vec<(DocId, f32)> {
    if let Some(backend) = trigram {
        match backend.search(query, limit, path_filter) {
            Ok(hits) => return hits,
            Err(e) => warn!(error = %e, "trigram tier failed; falling back to bm25"),
        }
    }
    keyword.search(query, limit, path_filter)
}

impl SearchDaemon {
    /// Build a daemon over the record store and an embedding provider
    pub fn new(
        config: DaemonConfig,
        records: Arc<RecordStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Arc<Self> {
        Self::with_trigram(config, records, embedder, None)
    }

    /// Build with an external trigram keyword engine
    ///
    /// The trigram backend indexes itself; the daemon only queries it.
    pub fn with_trigram(
        config: DaemonConfig,
        records: Arc<RecordStore>,
        embedder: Arc<dyn Embedder>,
        trigram: Option<Arc<dyn TrigramBackend>>,
    ) -> Arc<Self> {
        let dimension = embedder.dimension();
        Arc::new(SearchDaemon {
            config,
            records,
            keyword: Arc::new(KeywordIndex::new()),
            vectors: Arc::new(VectorIndex::new(dimension)),
            embedder,
            trigram,
            stats: RwLock::new(DaemonStats::default()),
            latencies: Mutex::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES)),
            pending: Arc::new(Mutex::new(HashSet::new())),
            initialized: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        })
    }

    /// Whether startup completed
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Warm every index and start the refresh loop
    pub async fn startup(&self) -> Result<()> {
        let kw_started = Instant::now();
        let records = Arc::clone(&self.records);
        let keyword = Arc::clone(&self.keyword);
        let vectors = Arc::clone(&self.vectors);
        let embedder = Arc::clone(&self.embedder);
        let indexed = tokio::task::spawn_blocking(move || -> Result<usize> {
            let chunks = records.list_chunks_with_paths()?;
            let mut count = 0;
            for (path, chunk) in chunks {
                index_chunk(
                    &keyword,
                    &vectors,
                    embedder.as_ref(),
                    &Document {
                        path,
                        chunk_index: chunk.chunk_index,
                        text: chunk.chunk_text,
                        embedding: chunk.embedding,
                    },
                )?;
                count += 1;
            }
            Ok(count)
        })
        .await
        .map_err(|e| NexusError::backend("search", format!("warm-up task failed: {e}")))??;
        let keyword_load_ms = kw_started.elapsed().as_secs_f64() * 1000.0;

        let db_started = Instant::now();
        self.records.ping()?;
        let db_warm_ms = db_started.elapsed().as_secs_f64() * 1000.0;

        // One throwaway query forces the vector structures into memory
        let vec_started = Instant::now();
        let probe = vec![0.0f32; self.vectors.dimension()];
        let _ = self
            .vectors
            .search(&probe, 1, None, self.config.vector_ef_search);
        let vector_warm_ms = vec_started.elapsed().as_secs_f64() * 1000.0;

        {
            let mut stats = self.stats.write();
            stats.keyword_load_ms = keyword_load_ms;
            stats.db_warm_ms = db_warm_ms;
            stats.vector_warm_ms = vector_warm_ms;
            stats.documents_indexed = indexed;
        }
        self.initialized.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);
        self.spawn_refresh_loop();

        info!(
            documents = indexed,
            keyword_load_ms, db_warm_ms, vector_warm_ms, "search daemon warm"
        );
        Ok(())
    }

    fn spawn_refresh_loop(&self) {
        let records = Arc::clone(&self.records);
        let keyword = Arc::clone(&self.keyword);
        let vectors = Arc::clone(&self.vectors);
        let embedder = Arc::clone(&self.embedder);
        let pending = Arc::clone(&self.pending);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        let debounce = std::time::Duration::from_secs_f64(
            self.config.refresh_debounce_seconds.max(0.01),
        );

        tokio::spawn(async move {
            while running.load(Ordering::Acquire) {
                tokio::select! {
                    _ = tokio::time::sleep(debounce) => {
                        let drained: Vec<String> = {
                            let mut set = pending.lock();
                            set.drain().collect()
                        };
                        if drained.is_empty() {
                            continue;
                        }
                        let records = Arc::clone(&records);
                        let keyword = Arc::clone(&keyword);
                        let vectors = Arc::clone(&vectors);
                        let embedder = Arc::clone(&embedder);
                        let _ = tokio::task::spawn_blocking(move || {
                            refresh_paths(
                                &records,
                                &keyword,
                                &vectors,
                                embedder.as_ref(),
                                drained,
                            )
                        })
                        .await;
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
    }

    /// Stop the refresh loop; pending changes are flushed once
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
        let flushed = self.refresh_pending();
        if flushed > 0 {
            debug!(flushed, "flushed pending refreshes at shutdown");
        }
        self.initialized.store(false, Ordering::Release);
    }

    // ========================================================================
    // Indexing
    // ========================================================================

    /// Index one chunk immediately (bypassing the debounce)
    pub fn index_document(&self, document: &Document) -> Result<()> {
        index_chunk(
            &self.keyword,
            &self.vectors,
            self.embedder.as_ref(),
            document,
        )
    }

    /// Record a file change for debounced refresh
    pub fn notify_file_change(&self, path: &str, _change_type: ChangeType) {
        self.pending.lock().insert(path.to_string());
    }

    /// Flush the pending set now; returns how many paths refreshed
    pub fn refresh_pending(&self) -> usize {
        let drained: Vec<String> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        refresh_paths(
            &self.records,
            &self.keyword,
            &self.vectors,
            self.embedder.as_ref(),
            drained,
        )
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Run a search
    ///
    /// Hybrid mode runs keyword and semantic with `3 × limit` candidates
    /// each in parallel and fuses the rankings.
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        path_filter: Option<&str>,
        alpha: f32,
        fusion: FusionMethod,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let results = match mode {
            SearchMode::Keyword => {
                let hits = keyword_tier(
                    self.trigram.as_ref(),
                    &self.keyword,
                    query,
                    limit,
                    path_filter,
                );
                self.to_results(hits, "keyword")
            }
            SearchMode::Semantic => {
                let embedding = self.embedder.embed(query)?;
                let hits = self.vectors.search(
                    &embedding,
                    limit,
                    path_filter,
                    self.config.vector_ef_search,
                );
                self.to_results(hits, "semantic")
            }
            SearchMode::Hybrid => {
                let candidates = limit.saturating_mul(3).max(limit);
                let filter = path_filter.map(String::from);

                let keyword = Arc::clone(&self.keyword);
                let trigram = self.trigram.clone();
                let kw_query = query.to_string();
                let kw_filter = filter.clone();
                let kw_task = tokio::task::spawn_blocking(move || {
                    keyword_tier(
                        trigram.as_ref(),
                        &keyword,
                        &kw_query,
                        candidates,
                        kw_filter.as_deref(),
                    )
                });

                let vectors = Arc::clone(&self.vectors);
                let embedder = Arc::clone(&self.embedder);
                let sem_query = query.to_string();
                let ef_search = self.config.vector_ef_search;
                let sem_task =
                    tokio::task::spawn_blocking(move || -> Result<Vec<(DocId, f32)>> {
                        let embedding = embedder.embed(&sem_query)?;
                        Ok(vectors.search(&embedding, candidates, filter.as_deref(), ef_search))
                    });

                let (kw_hits, sem_hits) = tokio::join!(kw_task, sem_task);
                let kw_hits = kw_hits
                    .map_err(|e| NexusError::backend("search", format!("keyword task: {e}")))?;
                let sem_hits = sem_hits
                    .map_err(|e| NexusError::backend("search", format!("semantic task: {e}")))??;

                let fused = fuse(&kw_hits, &sem_hits, fusion, alpha, limit);
                self.to_results(fused, "hybrid")
            }
        };

        self.track_latency(started.elapsed().as_secs_f64() * 1000.0);
        Ok(results)
    }

    fn to_results(&self, hits: Vec<(DocId, f32)>, search_type: &str) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|(doc_id, score)| SearchResult {
                chunk_text: self.keyword.text(&doc_id).unwrap_or_default(),
                path: doc_id.path,
                chunk_index: doc_id.chunk_index,
                score,
                search_type: search_type.to_string(),
            })
            .collect()
    }

    // ========================================================================
    // Latency tracking
    // ========================================================================

    fn track_latency(&self, latency_ms: f64) {
        let mut latencies = self.latencies.lock();
        latencies.push_back(latency_ms);
        while latencies.len() > MAX_LATENCY_SAMPLES {
            latencies.pop_front();
        }

        let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;
        let mut sorted: Vec<f64> = latencies.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let p99_idx = ((sorted.len() as f64) * 0.99) as usize;
        let p99 = sorted[p99_idx.min(sorted.len() - 1)];

        let mut stats = self.stats.write();
        stats.avg_latency_ms = avg;
        stats.p99_latency_ms = p99;
    }

    /// Stats snapshot
    pub fn stats(&self) -> DaemonStats {
        self.stats.read().clone()
    }

    /// Health snapshot for a server endpoint
    pub fn health(&self) -> serde_json::Value {
        let stats = self.stats();
        serde_json::json!({
            "status": if self.is_initialized() { "ready" } else { "starting" },
            "documents_indexed": stats.documents_indexed,
            "keyword_index_version": self.keyword.version(),
            "vector_count": self.vectors.len(),
            "avg_latency_ms": (stats.avg_latency_ms * 100.0).round() / 100.0,
            "p99_latency_ms": (stats.p99_latency_ms * 100.0).round() / 100.0,
            "pending_refreshes": self.pending.lock().len(),
        })
    }
}
