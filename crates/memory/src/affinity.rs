//! Affinity scoring and clustering
//!
//! Pairwise affinity blends semantic similarity with temporal closeness:
//!
//! ```text
//! affinity = beta * cos(v_i, v_j) + (1 - beta) * exp(-lambda * |t_i - t_j|)
//! ```
//!
//! Clustering is average-linkage agglomerative: repeatedly merge the two
//! clusters with the highest mean pairwise affinity until no pair clears
//! the threshold. Batch sizes are small (consolidation candidates), so
//! the cubic merge loop is fine.

/// One clusterable item
#[derive(Debug, Clone)]
pub struct AffinityItem {
    /// Stable id the caller maps back to a memory
    pub id: String,
    /// Embedding vector
    pub embedding: Vec<f32>,
    /// Timestamp in epoch milliseconds
    pub timestamp_ms: i64,
}

/// Cosine similarity; zero for mismatched or zero-norm vectors
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Blended semantic + temporal affinity between two items
///
/// `lambda` is a decay per hour of separation.
pub fn affinity(a: &AffinityItem, b: &AffinityItem, beta: f32, lambda: f64) -> f32 {
    let semantic = cosine(&a.embedding, &b.embedding);
    let delta_hours = (a.timestamp_ms - b.timestamp_ms).unsigned_abs() as f64 / 3_600_000.0;
    let temporal = (-lambda * delta_hours).exp() as f32;
    beta * semantic + (1.0 - beta) * temporal
}

/// Average-linkage clustering over the affinity matrix
///
/// Returns clusters as index sets into `items`; singletons included.
pub fn cluster_by_affinity(
    items: &[AffinityItem],
    threshold: f32,
    beta: f32,
    lambda: f64,
) -> Vec<Vec<usize>> {
    let n = items.len();
    if n == 0 {
        return Vec::new();
    }

    // Pairwise matrix once
    let mut matrix = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let score = affinity(&items[i], &items[j], beta, lambda);
            matrix[i][j] = score;
            matrix[j][i] = score;
        }
    }

    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    loop {
        let mut best: Option<(usize, usize, f32)> = None;
        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let linkage = average_linkage(&clusters[a], &clusters[b], &matrix);
                if linkage >= threshold
                    && best.map(|(_, _, score)| linkage > score).unwrap_or(true)
                {
                    best = Some((a, b, linkage));
                }
            }
        }
        match best {
            Some((a, b, _)) => {
                let merged = clusters.remove(b);
                clusters[a].extend(merged);
                clusters[a].sort_unstable();
            }
            None => break,
        }
    }
    clusters
}

fn average_linkage(a: &[usize], b: &[usize], matrix: &[Vec<f32>]) -> f32 {
    let mut sum = 0.0f32;
    for &i in a {
        for &j in b {
            sum += matrix[i][j];
        }
    }
    sum / (a.len() * b.len()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, embedding: Vec<f32>, timestamp_ms: i64) -> AffinityItem {
        AffinityItem {
            id: id.to_string(),
            embedding,
            timestamp_ms,
        }
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_affinity_decays_with_time() {
        let a = item("a", vec![1.0, 0.0], 0);
        let near = item("n", vec![1.0, 0.0], 60_000);
        let far = item("f", vec![1.0, 0.0], 100 * 3_600_000);

        let close = affinity(&a, &near, 0.5, 0.1);
        let distant = affinity(&a, &far, 0.5, 0.1);
        assert!(close > distant);
        // Same vector, same moment: affinity is 1
        let same = affinity(&a, &item("s", vec![1.0, 0.0], 0), 0.5, 0.1);
        assert!((same - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_beta_weighs_semantic_vs_temporal() {
        let a = item("a", vec![1.0, 0.0], 0);
        let orthogonal_now = item("o", vec![0.0, 1.0], 0);

        // beta = 1: purely semantic, orthogonal scores 0
        assert!(affinity(&a, &orthogonal_now, 1.0, 0.1).abs() < 1e-6);
        // beta = 0: purely temporal, same moment scores 1
        assert!((affinity(&a, &orthogonal_now, 0.0, 0.1) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_clustering_groups_similar_recent_items() {
        let items = vec![
            item("a1", vec![1.0, 0.0], 0),
            item("a2", vec![0.95, 0.05], 60_000),
            item("b1", vec![0.0, 1.0], 500 * 3_600_000),
        ];
        let clusters = cluster_by_affinity(&items, 0.7, 0.7, 0.05);
        assert_eq!(clusters.len(), 2);
        let big = clusters.iter().find(|c| c.len() == 2).unwrap();
        assert_eq!(big, &vec![0, 1]);
    }

    #[test]
    fn test_clustering_high_threshold_keeps_singletons() {
        let items = vec![
            item("a", vec![1.0, 0.0], 0),
            item("b", vec![0.0, 1.0], 1_000 * 3_600_000),
        ];
        let clusters = cluster_by_affinity(&items, 0.99, 0.9, 1.0);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_clustering_empty() {
        assert!(cluster_by_affinity(&[], 0.5, 0.5, 0.1).is_empty());
    }
}
