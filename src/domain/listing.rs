use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DEFAULT_MATCH_THRESHOLD;

/// The two catalogs a listing can come from.
///
/// `A` is the catalog the user searches from (query role), `B` the catalog
/// searched against (passage role).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    A,
    B,
}

impl SourceTag {
    /// The catalog on the other side of a comparison.
    pub fn opposite(self) -> Self {
        match self {
            SourceTag::A => SourceTag::B,
            SourceTag::B => SourceTag::A,
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::A => f.write_str("A"),
            SourceTag::B => f.write_str("B"),
        }
    }
}

/// One scraped product record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub sku: String,
    pub title: String,
    pub price: Option<f64>,
    pub image_url: String,
    pub source_url: String,
    pub source_tag: SourceTag,
    pub query_category: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ListingError {
    #[error("listing {id} from catalog {source_tag} has an empty title")]
    EmptyTitle { id: i64, source_tag: SourceTag },
    #[error("listing {id} from catalog {source_tag} has an invalid price {price}")]
    InvalidPrice {
        id: i64,
        source_tag: SourceTag,
        price: f64,
    },
}

impl Listing {
    /// Checks the invariants every listing reaching the matcher must hold.
    pub fn validate(&self) -> Result<(), ListingError> {
        if self.title.trim().is_empty() {
            return Err(ListingError::EmptyTitle {
                id: self.id,
                source_tag: self.source_tag,
            });
        }
        if let Some(price) = self.price
            && (price.is_nan() || price < 0.0)
        {
            return Err(ListingError::InvalidPrice {
                id: self.id,
                source_tag: self.source_tag,
                price,
            });
        }
        Ok(())
    }
}

/// Cosine similarity gate for Stage 1, a value in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
pub struct MatchThreshold(f32);

#[derive(Debug, Error, PartialEq)]
#[error("match threshold must be within [0, 1], got {0}")]
pub struct InvalidThreshold(pub f32);

impl MatchThreshold {
    pub fn new(value: f32) -> Result<Self, InvalidThreshold> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidThreshold(value))
        }
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for MatchThreshold {
    fn default() -> Self {
        Self(DEFAULT_MATCH_THRESHOLD)
    }
}

/// A listing from the opposite catalog that cleared Stage 1.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Stage1Candidate {
    pub listing: Listing,
    pub similarity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Stage 2 judgment for one (query, candidate) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Verdict {
    pub is_match: bool,
    pub confidence: Confidence,
    pub reasoning: String,
}

impl Verdict {
    /// The verdict used whenever a candidate could not be verified.
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            is_match: false,
            confidence: Confidence::Low,
            reasoning: reason.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerifiedMatch {
    pub candidate: Stage1Candidate,
    pub verdict: Verdict,
}

/// Result of one full pipeline pass for a single query listing.
///
/// `verified_matches` holds the candidates judged to be the same product and
/// `rejected` the remaining Stage 1 survivors; both follow Stage 1 order.
#[derive(Clone, Debug, Serialize)]
pub struct MatchOutcome {
    pub query: Listing,
    pub verified_matches: Vec<VerifiedMatch>,
    pub rejected: Vec<VerifiedMatch>,
    pub stage1_count: usize,
    pub verified_count: usize,
    pub finished_at: DateTime<Utc>,
}

impl MatchOutcome {
    pub fn empty(query: Listing) -> Self {
        Self {
            query,
            verified_matches: Vec::new(),
            rejected: Vec::new(),
            stage1_count: 0,
            verified_count: 0,
            finished_at: Utc::now(),
        }
    }
}
