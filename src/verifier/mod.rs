//! Stage 2: pairwise verification of Stage 1 candidates by an external
//! judgment service.
//!
//! Verification fails closed. Any call or parsing failure yields a
//! non-matching, low-confidence verdict whose reasoning names the failure.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::domain::listing::Verdict;

pub mod gemini;
pub mod prompt;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("service response had no text")]
    EmptyResponse,
    #[error("malformed verdict: {0}")]
    Malformed(String),
}

/// Inputs for one verification request.
#[derive(Clone, Debug, PartialEq)]
pub struct JudgeRequest {
    pub query_title: String,
    pub candidate_title: String,
    pub similarity: f32,
}

impl JudgeRequest {
    pub fn prompt(&self) -> String {
        prompt::build_prompt(&self.query_title, &self.candidate_title, self.similarity)
    }
}

/// An external service that judges whether two titles denote the same
/// product and answers with raw verdict text.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, JudgeError>;
}

#[async_trait]
impl<T: Judge + ?Sized> Judge for Arc<T> {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, JudgeError> {
        self.as_ref().judge(request).await
    }
}

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)(?:```|$)").expect("valid fence pattern")
    })
}

/// Removes markdown code fences around a response, if any. A missing closing
/// fence, as in truncated replies, is tolerated.
pub(crate) fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match fence_pattern().captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Parses a response that must contain exactly the three verdict fields.
pub(crate) fn parse_verdict(text: &str) -> Result<Verdict, JudgeError> {
    serde_json::from_str(strip_fences(text)).map_err(|error| JudgeError::Malformed(error.to_string()))
}

/// Runs one independent judgment per candidate.
pub struct MatchVerifier<J> {
    judge: J,
}

impl<J: Judge> MatchVerifier<J> {
    pub fn new(judge: J) -> Self {
        Self { judge }
    }

    /// Judges one candidate, surfacing call and parsing failures.
    pub async fn try_verify(
        &self,
        query_title: &str,
        candidate_title: &str,
        similarity: f32,
    ) -> Result<Verdict, JudgeError> {
        let request = JudgeRequest {
            query_title: query_title.to_string(),
            candidate_title: candidate_title.to_string(),
            similarity,
        };
        let text = self.judge.judge(&request).await?;
        parse_verdict(&text)
    }

    /// Judges one candidate, degrading any failure to a fail-closed verdict.
    pub async fn verify(&self, query_title: &str, candidate_title: &str, similarity: f32) -> Verdict {
        match self.try_verify(query_title, candidate_title, similarity).await {
            Ok(verdict) => verdict,
            Err(error) => {
                log::warn!("Verification of '{candidate_title}' against '{query_title}' failed: {error}");
                degraded_verdict(&error)
            }
        }
    }
}

pub(crate) fn degraded_verdict(error: &JudgeError) -> Verdict {
    Verdict::fail_closed(format!("verification failed: {error}"))
}
