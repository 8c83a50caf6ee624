//! Hybrid fusion
//!
//! Combines keyword and semantic rankings into one ordered list. Three
//! algorithms:
//!
//! - **RRF**: `score = Σ 1 / (k + rank_i)`, k = 60
//! - **Weighted**: `score = α · vec_norm + (1 − α) · kw_norm`
//! - **RRF weighted**: RRF components blended by α
//!
//! Ties break on doc id so fused output is deterministic.

use crate::types::{DocId, FusionMethod};
use std::collections::HashMap;

/// Default RRF constant
pub const RRF_K: f32 = 60.0;

/// Fuse keyword and semantic rankings
///
/// Both inputs are ranked best-first. `alpha` weighs the semantic side:
/// 0 reproduces the keyword ranking, 1 the semantic ranking (up to ties).
pub fn fuse(
    keyword: &[(DocId, f32)],
    semantic: &[(DocId, f32)],
    method: FusionMethod,
    alpha: f32,
    limit: usize,
) -> Vec<(DocId, f32)> {
    let alpha = alpha.clamp(0.0, 1.0);
    let fused = match method {
        FusionMethod::Rrf => rrf(keyword, semantic),
        FusionMethod::Weighted => weighted(keyword, semantic, alpha),
        FusionMethod::RrfWeighted => rrf_weighted(keyword, semantic, alpha),
    };

    let mut ranked: Vec<(DocId, f32)> = fused.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(limit);
    ranked
}

fn rrf(keyword: &[(DocId, f32)], semantic: &[(DocId, f32)]) -> HashMap<DocId, f32> {
    let mut scores: HashMap<DocId, f32> = HashMap::new();
    for list in [keyword, semantic] {
        for (rank, (doc_id, _)) in list.iter().enumerate() {
            *scores.entry(doc_id.clone()).or_insert(0.0) +=
                1.0 / (RRF_K + (rank + 1) as f32);
        }
    }
    scores
}

fn weighted(
    keyword: &[(DocId, f32)],
    semantic: &[(DocId, f32)],
    alpha: f32,
) -> HashMap<DocId, f32> {
    let kw_norm = max_normalize(keyword);
    let sem_norm = max_normalize(semantic);

    let mut scores: HashMap<DocId, f32> = HashMap::new();
    for (doc_id, score) in kw_norm {
        *scores.entry(doc_id).or_insert(0.0) += (1.0 - alpha) * score;
    }
    for (doc_id, score) in sem_norm {
        *scores.entry(doc_id).or_insert(0.0) += alpha * score;
    }
    scores
}

fn rrf_weighted(
    keyword: &[(DocId, f32)],
    semantic: &[(DocId, f32)],
    alpha: f32,
) -> HashMap<DocId, f32> {
    let mut scores: HashMap<DocId, f32> = HashMap::new();
    for (rank, (doc_id, _)) in keyword.iter().enumerate() {
        *scores.entry(doc_id.clone()).or_insert(0.0) +=
            (1.0 - alpha) / (RRF_K + (rank + 1) as f32);
    }
    for (rank, (doc_id, _)) in semantic.iter().enumerate() {
        *scores.entry(doc_id.clone()).or_insert(0.0) += alpha / (RRF_K + (rank + 1) as f32);
    }
    scores
}

/// Normalize scores into [0, 1] by the list maximum
fn max_normalize(list: &[(DocId, f32)]) -> Vec<(DocId, f32)> {
    let max = list
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() || max <= 0.0 {
        return list.to_vec();
    }
    list.iter()
        .map(|(id, s)| (id.clone(), s / max))
        .collect()
}
