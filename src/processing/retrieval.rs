//! Stage 1: cosine-similarity retrieval over listing embeddings.

use thiserror::Error;

use crate::domain::listing::{Listing, MatchThreshold, Stage1Candidate};
use crate::processing::embedding::normalize_embedding;

#[derive(Debug, Error, PartialEq)]
pub enum RetrievalError {
    #[error("{listings} candidate listings but {vectors} candidate vectors")]
    LengthMismatch { listings: usize, vectors: usize },
    #[error("candidate vector {index} has dimension {actual}, query has {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Caps the candidate pool before anything is scored.
///
/// Keeps the first `max` listings in pool order.
pub fn truncate_pool(pool: &[Listing], max: usize) -> &[Listing] {
    &pool[..pool.len().min(max)]
}

/// Scores every candidate against the query and keeps those at or above the
/// threshold, best first.
///
/// Equal similarities keep their pool order.
pub fn retrieve(
    query_vector: &[f32],
    candidates: &[Listing],
    candidate_vectors: &[Vec<f32>],
    threshold: MatchThreshold,
) -> Result<Vec<Stage1Candidate>, RetrievalError> {
    if candidates.len() != candidate_vectors.len() {
        return Err(RetrievalError::LengthMismatch {
            listings: candidates.len(),
            vectors: candidate_vectors.len(),
        });
    }

    let query = normalize_embedding(query_vector);

    let mut scored = Vec::with_capacity(candidates.len());
    for (index, (listing, vector)) in candidates.iter().zip(candidate_vectors).enumerate() {
        if vector.len() != query.len() {
            return Err(RetrievalError::DimensionMismatch {
                index,
                expected: query.len(),
                actual: vector.len(),
            });
        }
        let candidate = normalize_embedding(vector);
        let similarity: f32 = query.iter().zip(&candidate).map(|(a, b)| a * b).sum();
        if similarity >= threshold.get() {
            scored.push(Stage1Candidate {
                listing: listing.clone(),
                similarity,
            });
        }
    }

    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::listing::SourceTag;

    fn listing(id: i64) -> Listing {
        Listing {
            id,
            sku: format!("sku-{id}"),
            title: format!("item {id}"),
            price: Some(100.0),
            image_url: String::new(),
            source_url: String::new(),
            source_tag: SourceTag::B,
            query_category: "test".to_string(),
        }
    }

    fn threshold(value: f32) -> MatchThreshold {
        MatchThreshold::new(value).expect("valid threshold")
    }

    #[test]
    fn retrieve_returns_empty_when_nothing_clears_threshold() {
        let result = retrieve(
            &[1.0, 0.0],
            &[listing(1)],
            &[vec![0.0, 1.0]],
            threshold(0.5),
        )
        .expect("retrieval should succeed");

        assert!(result.is_empty());
    }

    #[test]
    fn retrieve_sorts_descending_and_normalizes_inputs() {
        let candidates = vec![listing(10), listing(20), listing(30)];
        let vectors = vec![
            vec![0.0, 5.0, 0.0],
            vec![7.0, 0.0, 0.0],
            vec![2.0, 2.0, 0.0],
        ];

        let result = retrieve(&[3.0, 0.0, 0.0], &candidates, &vectors, threshold(0.0))
            .expect("retrieval should succeed");

        let ids: Vec<i64> = result.iter().map(|c| c.listing.id).collect();
        assert_eq!(ids, vec![20, 30, 10]);
        assert!((result[0].similarity - 1.0).abs() < 1e-5);
        assert!((result[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    }

    #[test]
    fn retrieve_keeps_pool_order_for_ties() {
        let candidates = vec![listing(3), listing(1), listing(2)];
        let vectors = vec![vec![1.0, 1.0]; 3];

        let result = retrieve(&[1.0, 1.0], &candidates, &vectors, threshold(0.9))
            .expect("retrieval should succeed");

        let ids: Vec<i64> = result.iter().map(|c| c.listing.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn retrieve_includes_similarity_equal_to_threshold() {
        let result = retrieve(&[1.0, 0.0], &[listing(1)], &[vec![1.0, 0.0]], threshold(1.0))
            .expect("retrieval should succeed");
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn raising_threshold_never_grows_result() {
        let candidates: Vec<Listing> = (0..20).map(listing).collect();
        let vectors: Vec<Vec<f32>> = (0..20)
            .map(|i| vec![1.0, i as f32 / 10.0, (i % 3) as f32])
            .collect();

        let mut previous = usize::MAX;
        for step in 0..=10 {
            let t = threshold(step as f32 / 10.0);
            let result = retrieve(&[1.0, 0.0, 0.0], &candidates, &vectors, t)
                .expect("retrieval should succeed");
            assert!(result.len() <= previous);
            assert!(result.iter().all(|c| c.similarity >= t.get()));
            assert!(result.windows(2).all(|w| w[0].similarity >= w[1].similarity));
            previous = result.len();
        }
    }

    #[test]
    fn retrieve_rejects_mismatched_inputs() {
        assert_eq!(
            retrieve(&[1.0], &[listing(1)], &[], threshold(0.5)),
            Err(RetrievalError::LengthMismatch {
                listings: 1,
                vectors: 0
            })
        );
        assert_eq!(
            retrieve(&[1.0, 0.0], &[listing(1)], &[vec![1.0]], threshold(0.5)),
            Err(RetrievalError::DimensionMismatch {
                index: 0,
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn truncate_pool_keeps_leading_listings() {
        let pool: Vec<Listing> = (0..150).map(listing).collect();

        let kept = truncate_pool(&pool, 100);

        assert_eq!(kept.len(), 100);
        assert_eq!(kept[99].id, 99);
        assert_eq!(truncate_pool(&pool[..5], 100).len(), 5);
    }
}
