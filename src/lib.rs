pub mod domain;
pub mod embedding;
pub mod models;
pub mod processing;
pub mod repository;
pub mod verifier;

/// Stage 1 cosine-similarity threshold used when none is configured.
///
/// Tuned for the multilingual E5 large model; other models need their own value.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.739465;

/// Largest candidate pool scored for a single query listing.
pub const MAX_CANDIDATE_POOL: usize = 100;
