//! Weighted Reciprocal Rank Fusion
//!
//! Merges independently-ranked result lists into one ranking without score
//! normalization. Identity is the (chunk_id, page, content) triple; the
//! first list an identity appears in supplies the representative hit.

use crate::SearchHit;
use std::collections::HashMap;

/// RRF rank constant
pub const RRF_K: f64 = 60.0;

struct Accumulated {
    hit: SearchHit,
    score: f64,
}

/// Fuse ranked lists with per-list weights. An entry at 0-based rank `r` in
/// list `i` contributes `weights[i] / (RRF_K + r + 1)`. Lists beyond the
/// weights slice weigh 1.0. Score ties keep first-appearance order.
pub fn fuse_weighted(lists: &[Vec<SearchHit>], weights: &[f64], limit: usize) -> Vec<SearchHit> {
    let mut order: Vec<Accumulated> = Vec::new();
    let mut index: HashMap<(i64, i32, String), usize> = HashMap::new();

    for (list_idx, list) in lists.iter().enumerate() {
        let weight = weights.get(list_idx).copied().unwrap_or(1.0);

        for (rank, hit) in list.iter().enumerate() {
            let contribution = weight / (RRF_K + rank as f64 + 1.0);
            let key = (
                hit.metadata.chunk_id,
                hit.metadata.page,
                hit.content.clone(),
            );

            match index.get(&key) {
                Some(&i) => order[i].score += contribution,
                None => {
                    index.insert(key, order.len());
                    order.push(Accumulated {
                        hit: hit.clone(),
                        score: contribution,
                    });
                }
            }
        }
    }

    // sort_by is stable, so equal scores keep first-appearance order
    order.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    order.truncate(limit);
    order.into_iter().map(|a| a.hit).collect()
}

/// Unweighted fusion: every list weighs 1.0
pub fn fuse(lists: &[Vec<SearchHit>], limit: usize) -> Vec<SearchHit> {
    fuse_weighted(lists, &[], limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HitMetadata, RetrievalMethod, SearchScope};
    use chrono::Utc;

    fn hit(chunk_id: i64, page: i32, content: &str) -> SearchHit {
        SearchHit {
            content: content.to_string(),
            metadata: HitMetadata {
                chunk_id,
                page,
                document_id: 1,
                document_title: None,
                distance: None,
                source: "test".to_string(),
                search_scope: SearchScope::Document,
                retrieval_method: RetrievalMethod::DocumentEnsembleRrf,
                timestamp: Utc::now(),
            },
        }
    }

    #[test]
    fn test_single_item_lists_tie_with_exact_score() {
        let a = hit(1, 1, "alpha");
        let b = hit(2, 1, "beta");

        let fused = fuse(&[vec![a], vec![b]], 10);

        assert_eq!(fused.len(), 2);
        // both score 1/61, first-seen list wins the tie
        assert_eq!(fused[0].metadata.chunk_id, 1);
        assert_eq!(fused[1].metadata.chunk_id, 2);
    }

    #[test]
    fn test_duplicated_list_keeps_top_rank() {
        let list = vec![hit(1, 1, "first"), hit(2, 1, "second"), hit(3, 1, "third")];

        let fused = fuse(&[list.clone(), list], 10);

        assert_eq!(fused[0].metadata.chunk_id, 1);
        assert_eq!(fused[1].metadata.chunk_id, 2);
        assert_eq!(fused[2].metadata.chunk_id, 3);
    }

    #[test]
    fn test_item_in_both_lists_outranks_singletons() {
        let lexical = vec![hit(1, 1, "shared"), hit(2, 1, "lexical only")];
        let ann = vec![hit(3, 1, "ann only"), hit(1, 1, "shared")];

        let fused = fuse(&[lexical, ann], 10);
        assert_eq!(fused[0].metadata.chunk_id, 1);
    }

    #[test]
    fn test_weights_shift_ranking() {
        // same ranks in both lists, so the heavier list's item wins
        let lexical = vec![hit(1, 1, "lexical top")];
        let ann = vec![hit(2, 1, "ann top")];

        let fused = fuse_weighted(&[lexical, ann], &[0.4, 0.6], 10);
        assert_eq!(fused[0].metadata.chunk_id, 2);
    }

    #[test]
    fn test_first_seen_representative_wins() {
        let mut from_lexical = hit(1, 1, "same identity");
        from_lexical.metadata.source = "bm25".to_string();
        let mut from_ann = hit(1, 1, "same identity");
        from_ann.metadata.source = "ann".to_string();

        let fused = fuse(&[vec![from_lexical], vec![from_ann]], 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].metadata.source, "bm25");
    }

    #[test]
    fn test_limit_truncates() {
        let list: Vec<SearchHit> = (0..20).map(|i| hit(i, 1, "filler")).collect();
        assert_eq!(fuse(&[list], 10).len(), 10);
    }

    #[test]
    fn test_identity_distinguishes_pages() {
        // same chunk id but different pages are distinct identities
        let fused = fuse(&[vec![hit(1, 1, "text")], vec![hit(1, 2, "text")]], 10);
        assert_eq!(fused.len(), 2);
    }
}
