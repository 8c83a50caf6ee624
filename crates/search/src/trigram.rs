//! Trigram keyword tier
//!
//! The fastest keyword tier is an external trigram engine reached through
//! the [`TrigramBackend`] port; the daemon tries it first and falls back
//! to the in-memory BM25 index when it is absent or fails. The bundled
//! [`TrigramIndex`] is a small in-process implementation of the same
//! port, useful for deployments without an external engine and for tests.

use crate::types::DocId;
use dashmap::DashMap;
use nexus_core::Result;
use std::collections::{HashMap, HashSet};

/// External trigram engine port
pub trait TrigramBackend: Send + Sync {
    /// Ranked substring search over indexed chunks
    fn search(&self, query: &str, limit: usize, path_filter: Option<&str>)
        -> Result<Vec<(DocId, f32)>>;
}

/// Extract lowercase character trigrams
fn trigrams(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    if chars.len() < 3 {
        return HashSet::new();
    }
    chars
        .windows(3)
        .filter(|w| w.iter().all(|c| !c.is_whitespace()))
        .map(|w| w.iter().collect())
        .collect()
}

/// In-process trigram index
///
/// Scores by trigram overlap: `|q ∩ d| / |q|`. Good at substring and
/// typo-adjacent matches the tokenizing BM25 index misses.
#[derive(Default)]
pub struct TrigramIndex {
    postings: DashMap<String, HashSet<DocId>>,
    doc_trigrams: DashMap<DocId, HashSet<String>>,
}

impl TrigramIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one chunk; re-indexing replaces the previous version
    pub fn index_document(&self, doc_id: &DocId, text: &str) {
        self.remove_document(doc_id);
        let grams = trigrams(text);
        for gram in &grams {
            self.postings
                .entry(gram.clone())
                .or_default()
                .insert(doc_id.clone());
        }
        self.doc_trigrams.insert(doc_id.clone(), grams);
    }

    /// Remove one chunk
    pub fn remove_document(&self, doc_id: &DocId) {
        if let Some((_, grams)) = self.doc_trigrams.remove(doc_id) {
            for gram in grams {
                if let Some(mut entry) = self.postings.get_mut(&gram) {
                    entry.remove(doc_id);
                }
            }
        }
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.doc_trigrams.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.doc_trigrams.is_empty()
    }
}

impl TrigramBackend for TrigramIndex {
    fn search(
        &self,
        query: &str,
        limit: usize,
        path_filter: Option<&str>,
    ) -> Result<Vec<(DocId, f32)>> {
        let query_grams = trigrams(query);
        if query_grams.is_empty() {
            return Ok(Vec::new());
        }

        let mut overlap: HashMap<DocId, usize> = HashMap::new();
        for gram in &query_grams {
            if let Some(docs) = self.postings.get(gram) {
                for doc_id in docs.iter() {
                    if let Some(prefix) = path_filter {
                        if !crate::index::path_matches(&doc_id.path, prefix) {
                            continue;
                        }
                    }
                    *overlap.entry(doc_id.clone()).or_insert(0) += 1;
                }
            }
        }

        let total = query_grams.len() as f32;
        let mut ranked: Vec<(DocId, f32)> = overlap
            .into_iter()
            .map(|(doc_id, count)| (doc_id, count as f32 / total))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}
