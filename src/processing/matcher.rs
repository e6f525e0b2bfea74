use futures::StreamExt;
use futures::stream;
use thiserror::Error;

use crate::domain::listing::{
    Listing, ListingError, MatchOutcome, MatchThreshold, SourceTag, VerifiedMatch,
};
use crate::embedding::{EmbeddingEngine, EmbeddingError};
use crate::processing::embedding::embedding_text;
use crate::processing::retrieval::{RetrievalError, retrieve, truncate_pool};
use crate::processing::{CancelFlag, MatchRequest, ProgressSink};
use crate::repository::{CatalogReader, RepositoryError};
use crate::verifier::{Judge, MatchVerifier, degraded_verdict};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("invalid query listing: {0}")]
    InvalidListing(#[from] ListingError),
    #[error("match job cancelled")]
    Cancelled,
}

#[derive(Clone, Copy, Debug)]
pub struct MatcherSettings {
    /// Largest candidate pool scored in Stage 1.
    pub max_candidates: usize,
    /// Stage 2 calls allowed in flight at once; `1` is strictly sequential.
    pub verify_concurrency: usize,
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct MatchStats {
    pub pool_loaded: usize,
    pub rejected_listings: usize,
    pub truncated: usize,
    pub candidates_scored: usize,
    pub stage1_count: usize,
    pub verified_count: usize,
    pub verification_failures: usize,
}

/// Two-stage matcher: embedding retrieval followed by per-candidate judgment.
pub struct ProductMatcher<J> {
    engine: EmbeddingEngine,
    verifier: MatchVerifier<J>,
    settings: MatcherSettings,
}

impl<J: Judge> ProductMatcher<J> {
    pub fn new(engine: EmbeddingEngine, verifier: MatchVerifier<J>, settings: MatcherSettings) -> Self {
        Self {
            engine,
            verifier,
            settings,
        }
    }

    /// Runs the full pipeline for one query listing against a candidate pool.
    ///
    /// Pool listings that are malformed or come from the query's own catalog
    /// are dropped before truncation. Once `cancel` is set the job returns
    /// [`MatchError::Cancelled`] instead of an outcome and Stage 2 stops
    /// issuing calls.
    pub async fn run(
        &self,
        query: &Listing,
        pool: &[Listing],
        threshold: MatchThreshold,
        progress: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<(MatchOutcome, MatchStats), MatchError> {
        query.validate()?;
        let mut stats = MatchStats {
            pool_loaded: pool.len(),
            ..Default::default()
        };
        progress.report(0, 1, &format!("Matching '{}'", query.title));

        let candidate_source = query.source_tag.opposite();
        let valid: Vec<Listing> = pool
            .iter()
            .filter(|listing| match listing.validate() {
                Ok(()) if listing.source_tag == candidate_source => true,
                Ok(()) => {
                    log::warn!(
                        "Rejecting listing {} from catalog {}: same catalog as the query",
                        listing.id,
                        listing.source_tag
                    );
                    false
                }
                Err(error) => {
                    log::warn!("Rejecting listing: {error}");
                    false
                }
            })
            .cloned()
            .collect();
        stats.rejected_listings = pool.len() - valid.len();

        let candidates = truncate_pool(&valid, self.settings.max_candidates);
        stats.truncated = valid.len() - candidates.len();
        if stats.truncated > 0 {
            log::warn!(
                "Candidate pool for '{}' truncated from {} to {} listings",
                query.title,
                valid.len(),
                candidates.len()
            );
        }
        stats.candidates_scored = candidates.len();
        progress.report(
            0,
            candidates.len(),
            &format!("Loaded {} candidates from catalog {candidate_source}", candidates.len()),
        );

        if candidates.is_empty() {
            ensure_active(cancel, query)?;
            progress.report(1, 1, "No candidates to compare");
            return Ok((MatchOutcome::empty(query.clone()), stats));
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|listing| embedding_text(&listing.title, listing.source_tag))
            .collect();
        let (query_vector, candidate_vectors) = self
            .embed(embedding_text(&query.title, query.source_tag), texts)
            .await?;
        ensure_active(cancel, query)?;
        progress.report(
            candidates.len(),
            candidates.len(),
            &format!("Embedded {} candidates", candidates.len()),
        );

        let stage1 = retrieve(&query_vector, candidates, &candidate_vectors, threshold)?;
        stats.stage1_count = stage1.len();
        progress.report(
            1,
            1,
            &format!(
                "Stage 1 found {} candidates at or above {:.4}",
                stage1.len(),
                threshold.get()
            ),
        );

        if stage1.is_empty() {
            ensure_active(cancel, query)?;
            return Ok((MatchOutcome::empty(query.clone()), stats));
        }

        let total = stage1.len();
        let query_title = query.title.as_str();
        let verifier = &self.verifier;
        let mut verdicts = stream::iter(stage1)
            .map(move |candidate| async move {
                if cancel.is_cancelled() {
                    return (candidate, None);
                }
                let result = verifier
                    .try_verify(query_title, &candidate.listing.title, candidate.similarity)
                    .await;
                (candidate, Some(result))
            })
            .buffered(self.settings.verify_concurrency.max(1));

        let mut outcome = MatchOutcome::empty(query.clone());
        outcome.stage1_count = total;
        let mut done = 0;
        while let Some((candidate, result)) = verdicts.next().await {
            let Some(result) = result.filter(|_| !cancel.is_cancelled()) else {
                log::info!("Match job for '{}' cancelled after {done}/{total}", query.title);
                return Err(MatchError::Cancelled);
            };
            let verdict = match result {
                Ok(verdict) => verdict,
                Err(error) => {
                    stats.verification_failures += 1;
                    log::warn!(
                        "Verification of listing {} against '{}' failed: {error}",
                        candidate.listing.id,
                        query.title
                    );
                    degraded_verdict(&error)
                }
            };

            done += 1;
            progress.report(
                done,
                total,
                &format!(
                    "Verified {done}/{total}: {} ({})",
                    candidate.listing.title,
                    if verdict.is_match { "match" } else { "no match" }
                ),
            );

            let evaluated = VerifiedMatch { candidate, verdict };
            if evaluated.verdict.is_match {
                outcome.verified_matches.push(evaluated);
            } else {
                outcome.rejected.push(evaluated);
            }
        }

        outcome.verified_count = outcome.verified_matches.len();
        outcome.finished_at = chrono::Utc::now();
        stats.verified_count = outcome.verified_count;
        Ok((outcome, stats))
    }

    /// Embeds the query and candidate texts on the blocking pool, since
    /// inference holds the model lock for the whole batch.
    async fn embed(
        &self,
        query_text: String,
        texts: Vec<String>,
    ) -> Result<(Vec<f32>, Vec<Vec<f32>>), EmbeddingError> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || -> Result<_, EmbeddingError> {
            let query_vector = engine.embed_one(&query_text)?;
            let candidate_vectors = engine.embed_many(&texts)?;
            Ok((query_vector, candidate_vectors))
        })
        .await
        .map_err(|error| EmbeddingError::InferenceFailed(error.to_string()))?
    }
}

fn ensure_active(cancel: &CancelFlag, query: &Listing) -> Result<(), MatchError> {
    if cancel.is_cancelled() {
        log::info!("Match job for '{}' cancelled before verification", query.title);
        return Err(MatchError::Cancelled);
    }
    Ok(())
}

/// Handle one match request: load the query and its pool, run the pipeline
/// and log the result. Cancelled jobs report nothing.
pub async fn process_match_message<R, J>(
    msg: MatchRequest,
    repo: &R,
    matcher: &ProductMatcher<J>,
    threshold: MatchThreshold,
    cancel: &CancelFlag,
) -> Option<MatchOutcome>
where
    R: CatalogReader,
    J: Judge,
{
    log::info!("Received Match: {msg:?}");

    let query = match repo.get_listing(SourceTag::A, msg.listing_id) {
        Ok(query) => query,
        Err(error) => {
            log::error!("Failed to load query listing {}: {error}", msg.listing_id);
            return None;
        }
    };
    let pool = match repo.list_listings(SourceTag::B, &msg.category) {
        Ok(pool) => pool,
        Err(error) => {
            log::error!("Failed to list candidates for category {}: {error}", msg.category);
            return None;
        }
    };

    let progress = crate::processing::LogProgress {
        job: format!("{}#{}", msg.category, msg.listing_id),
    };

    match matcher.run(&query, &pool, threshold, &progress, cancel).await {
        Ok(_) if cancel.is_cancelled() => {
            log::info!("Match for listing {} superseded, result dropped", msg.listing_id);
            None
        }
        Ok((outcome, stats)) => {
            log::info!(
                "Finished Match for listing {} in {}: pool_loaded={}, rejected_listings={}, truncated={}, candidates_scored={}, stage1_count={}, verified_count={}, verification_failures={}",
                msg.listing_id,
                msg.category,
                stats.pool_loaded,
                stats.rejected_listings,
                stats.truncated,
                stats.candidates_scored,
                stats.stage1_count,
                stats.verified_count,
                stats.verification_failures
            );
            if stats.verification_failures > 0 {
                log::warn!(
                    "Match for listing {} had {} candidates that could not be verified",
                    msg.listing_id,
                    stats.verification_failures
                );
            }
            Some(outcome)
        }
        Err(MatchError::Cancelled) => {
            log::info!("Match for listing {} superseded, result dropped", msg.listing_id);
            None
        }
        Err(error) => {
            log::error!("Match failed for listing {}: {error}", msg.listing_id);
            None
        }
    }
}
