use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

pub mod embedding;
pub mod matcher;
pub mod retrieval;

#[derive(Deserialize, Debug)]
pub enum ZMQMessage {
    Match(MatchRequest),
    Reload,
}

/// Find catalog B equivalents of catalog A listing `listing_id`.
#[derive(Deserialize, Debug, Clone)]
pub struct MatchRequest {
    pub category: String,
    pub listing_id: i64,
}

/// Receives `(done, total, message)` updates while a job runs.
pub trait ProgressSink: Send + Sync {
    fn report(&self, done: usize, total: usize, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn report(&self, done: usize, total: usize, message: &str) {
        self(done, total, message)
    }
}

/// Writes progress to the log at debug level.
pub struct LogProgress {
    pub job: String,
}

impl ProgressSink for LogProgress {
    fn report(&self, done: usize, total: usize, message: &str) {
        log::debug!("[{}] {done}/{total} {message}", self.job);
    }
}

/// Shared flag telling a running job its listener has moved on.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
