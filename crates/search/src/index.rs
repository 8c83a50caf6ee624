//! In-memory inverted index with BM25 ranking
//!
//! This module provides:
//! - KeywordIndex with posting lists and corpus statistics
//! - Synchronous updates with a version watermark for consistency
//! - BM25 candidate scoring with deterministic tie-breaks
//!
//! # Thread Safety
//!
//! Uses DashMap for concurrent access; multiple readers and writers are
//! supported. Statistics counters use atomics with Acquire/Release
//! pairing so readers observe consistent totals.

use crate::tokenizer::{tokenize, tokenize_unique};
use crate::types::DocId;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Entry in a posting list
#[derive(Debug, Clone)]
pub struct PostingEntry {
    /// Chunk containing the term
    pub doc_id: DocId,
    /// Term frequency in this chunk
    pub tf: u32,
    /// Chunk length in tokens
    pub doc_len: u32,
}

/// List of chunks containing a term
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    /// Entries, in insertion order
    pub entries: Vec<PostingEntry>,
}

impl PostingList {
    fn remove(&mut self, doc_id: &DocId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| &e.doc_id != doc_id);
        before - self.entries.len()
    }
}

/// BM25 parameters
const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Hot keyword index
///
/// Stores chunk text alongside postings so hits carry their snippet
/// without a database round-trip.
pub struct KeywordIndex {
    postings: DashMap<String, PostingList>,
    doc_freqs: DashMap<String, usize>,
    texts: DashMap<DocId, String>,
    doc_lengths: DashMap<DocId, u32>,
    total_docs: AtomicUsize,
    total_doc_len: AtomicUsize,
    version: AtomicU64,
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordIndex {
    /// Create an empty index
    pub fn new() -> Self {
        KeywordIndex {
            postings: DashMap::new(),
            doc_freqs: DashMap::new(),
            texts: DashMap::new(),
            doc_lengths: DashMap::new(),
            total_docs: AtomicUsize::new(0),
            total_doc_len: AtomicUsize::new(0),
            version: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Number of indexed chunks
    pub fn total_docs(&self) -> usize {
        self.total_docs.load(Ordering::Acquire)
    }

    /// Version watermark; incremented on every update
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Document frequency of a term
    pub fn doc_freq(&self, term: &str) -> usize {
        self.doc_freqs.get(term).map(|r| *r).unwrap_or(0)
    }

    /// Average chunk length in tokens
    pub fn avg_doc_len(&self) -> f32 {
        let total = self.total_docs.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        self.total_doc_len.load(Ordering::Acquire) as f32 / total as f32
    }

    /// IDF with standard smoothing:
    /// `ln((N - df + 0.5) / (df + 0.5) + 1)`
    pub fn idf(&self, term: &str) -> f32 {
        let n = self.total_docs.load(Ordering::Acquire) as f32;
        let df = self.doc_freq(term) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Stored text of a chunk
    pub fn text(&self, doc_id: &DocId) -> Option<String> {
        self.texts.get(doc_id).map(|t| t.clone())
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Index one chunk; re-indexing replaces the previous version
    pub fn index_document(&self, doc_id: &DocId, text: &str) {
        if self.doc_lengths.contains_key(doc_id) {
            self.remove_document(doc_id);
        }

        let tokens = tokenize(text);
        let doc_len = tokens.len() as u32;

        let mut tf_map: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *tf_map.entry(token).or_insert(0) += 1;
        }

        for (term, tf) in tf_map {
            self.postings
                .entry(term.clone())
                .or_default()
                .entries
                .push(PostingEntry {
                    doc_id: doc_id.clone(),
                    tf,
                    doc_len,
                });
            self.doc_freqs
                .entry(term)
                .and_modify(|c| *c += 1)
                .or_insert(1);
        }

        self.texts.insert(doc_id.clone(), text.to_string());
        self.doc_lengths.insert(doc_id.clone(), doc_len);
        self.total_docs.fetch_add(1, Ordering::Relaxed);
        self.total_doc_len
            .fetch_add(doc_len as usize, Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Remove one chunk from the index
    pub fn remove_document(&self, doc_id: &DocId) {
        let doc_len = self.doc_lengths.remove(doc_id).map(|(_, len)| len);
        self.texts.remove(doc_id);

        let mut removed = false;
        for mut entry in self.postings.iter_mut() {
            let count = entry.remove(doc_id);
            if count > 0 {
                removed = true;
                let term = entry.key().clone();
                self.doc_freqs
                    .entry(term)
                    .and_modify(|c| *c = c.saturating_sub(count));
            }
        }

        if removed || doc_len.is_some() {
            self.total_docs.fetch_sub(1, Ordering::Relaxed);
            if let Some(len) = doc_len {
                self.total_doc_len.fetch_sub(len as usize, Ordering::Relaxed);
            }
            self.version.fetch_add(1, Ordering::Release);
        }
    }

    /// Remove every chunk of a path (file deleted or about to re-index)
    pub fn remove_path(&self, path: &str) {
        let ids: Vec<DocId> = self
            .doc_lengths
            .iter()
            .filter(|e| e.key().path == path)
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.remove_document(&id);
        }
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// BM25-ranked search
    ///
    /// Candidates come from the union of the query terms' posting lists;
    /// ties break on doc id so output order is deterministic.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        path_filter: Option<&str>,
    ) -> Vec<(DocId, f32)> {
        let terms = tokenize_unique(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let avg_len = self.avg_doc_len().max(1.0);

        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for term in &terms {
            let idf = self.idf(term);
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            for entry in &list.entries {
                if let Some(prefix) = path_filter {
                    if !path_matches(&entry.doc_id.path, prefix) {
                        continue;
                    }
                }
                let tf = entry.tf as f32;
                let len_norm = 1.0 - B + B * entry.doc_len as f32 / avg_len;
                let term_score = idf * (tf * (K1 + 1.0)) / (tf + K1 * len_norm);
                *scores.entry(entry.doc_id.clone()).or_insert(0.0) += term_score;
            }
        }

        let mut ranked: Vec<(DocId, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }
}

/// Segment-aware prefix match used by path filters
pub(crate) fn path_matches(path: &str, prefix: &str) -> bool {
    if prefix == "/" || prefix.is_empty() {
        return true;
    }
    let prefix = prefix.trim_end_matches('/');
    path == prefix || path.starts_with(&format!("{prefix}/"))
}
