//! In-memory vector index with cosine top-k
//!
//! Embeddings are L2-normalized at insert so similarity is a plain dot
//! product at query time. Lookup is an exact scan ordered by similarity;
//! the `ef_search` knob is accepted for parity with HNSW-backed
//! deployments and bounds the candidate pool.

use crate::index::path_matches;
use crate::types::DocId;
use dashmap::DashMap;
use nexus_core::{NexusError, Result};

/// Embedding port
///
/// The daemon talks to embedding providers only through this trait; a
/// provider failure surfaces as a typed backend error.
pub trait Embedder: Send + Sync {
    /// Embed a text into a fixed-dimension vector
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimension
    fn dimension(&self) -> usize;
}

/// Deterministic token-hash embedder
///
/// Maps each token into a dimension by hash and normalizes. No external
/// model; good enough for tests and for offline deployments where
/// semantic quality is traded for zero dependencies.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create an embedder with the given dimension
    pub fn new(dimension: usize) -> Self {
        HashEmbedder {
            dimension: dimension.max(8),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dimension];
        for token in crate::tokenizer::tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let dim = (h % self.dimension as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[dim] += sign;
        }
        Ok(normalize(vector))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// L2-normalize a vector; zero vectors stay zero
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Cosine similarity of two normalized vectors
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Vector store scanned by cosine similarity
pub struct VectorIndex {
    vectors: DashMap<DocId, Vec<f32>>,
    dimension: usize,
}

impl VectorIndex {
    /// Create an index for vectors of the given dimension
    pub fn new(dimension: usize) -> Self {
        VectorIndex {
            vectors: DashMap::new(),
            dimension,
        }
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Expected dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or replace a vector; dimension mismatches are rejected
    pub fn upsert(&self, doc_id: DocId, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(NexusError::Validation(format!(
                "embedding dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        self.vectors.insert(doc_id, normalize(vector));
        Ok(())
    }

    /// Remove a vector
    pub fn remove(&self, doc_id: &DocId) {
        self.vectors.remove(doc_id);
    }

    /// Remove every vector of a path
    pub fn remove_path(&self, path: &str) {
        let ids: Vec<DocId> = self
            .vectors
            .iter()
            .filter(|e| e.key().path == path)
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.vectors.remove(&id);
        }
    }

    /// Cosine top-k with optional path-prefix filter
    ///
    /// Ties break on doc id so output order is deterministic.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        path_filter: Option<&str>,
        ef_search: usize,
    ) -> Vec<(DocId, f32)> {
        let query = normalize(query.to_vec());
        let pool = limit.max(ef_search);

        let mut hits: Vec<(DocId, f32)> = self
            .vectors
            .iter()
            .filter(|entry| {
                path_filter
                    .map(|prefix| path_matches(&entry.key().path, prefix))
                    .unwrap_or(true)
            })
            .map(|entry| (entry.key().clone(), dot(&query, entry.value())))
            .collect();

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(pool);
        hits.truncate(limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(path: &str) -> DocId {
        DocId::new(path, 0)
    }

    #[test]
    fn test_upsert_and_search() {
        let index = VectorIndex::new(3);
        index.upsert(id("/x"), vec![1.0, 0.0, 0.0]).unwrap();
        index.upsert(id("/y"), vec![0.0, 1.0, 0.0]).unwrap();
        index.upsert(id("/xy"), vec![1.0, 1.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 3, None, 0);
        assert_eq!(hits[0].0, id("/x"));
        assert!(hits[0].1 > 0.99);
        assert_eq!(hits[1].0, id("/xy"));
        // Orthogonal vector scores ~0
        assert!(hits[2].1.abs() < 0.01);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = VectorIndex::new(4);
        assert!(index.upsert(id("/x"), vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_path_filter() {
        let index = VectorIndex::new(2);
        index.upsert(id("/ws/a"), vec![1.0, 0.0]).unwrap();
        index.upsert(id("/other/b"), vec![1.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 10, Some("/ws"), 0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.path, "/ws/a");
    }

    #[test]
    fn test_remove_path() {
        let index = VectorIndex::new(2);
        index.upsert(DocId::new("/a", 0), vec![1.0, 0.0]).unwrap();
        index.upsert(DocId::new("/a", 1), vec![0.0, 1.0]).unwrap();
        index.upsert(DocId::new("/b", 0), vec![1.0, 0.0]).unwrap();
        index.remove_path("/a");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_tie_break_on_doc_id() {
        let index = VectorIndex::new(2);
        index.upsert(id("/b"), vec![1.0, 0.0]).unwrap();
        index.upsert(id("/a"), vec![1.0, 0.0]).unwrap();
        let hits = index.search(&[1.0, 0.0], 2, None, 0);
        assert_eq!(hits[0].0.path, "/a");
    }

    #[test]
    fn test_hash_embedder_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed("authentication handler").unwrap();
        let b = embedder.embed("authentication handler").unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_hash_embedder_similar_texts_score_higher() {
        let embedder = HashEmbedder::new(64);
        let index = VectorIndex::new(64);
        index
            .upsert(id("/same"), embedder.embed("authentication handler code").unwrap())
            .unwrap();
        index
            .upsert(id("/diff"), embedder.embed("banana smoothie recipe").unwrap())
            .unwrap();

        let query = embedder.embed("authentication handler").unwrap();
        let hits = index.search(&query, 2, None, 0);
        assert_eq!(hits[0].0.path, "/same");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn test_zero_vector_safe() {
        let index = VectorIndex::new(2);
        index.upsert(id("/z"), vec![0.0, 0.0]).unwrap();
        let hits = index.search(&[0.0, 0.0], 1, None, 0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, 0.0);
    }
}
