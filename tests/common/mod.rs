//! Helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc::Receiver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use listing_matcher::domain::listing::{Listing, SourceTag};
use listing_matcher::embedding::{EmbeddingEngine, EmbeddingError, EmbeddingResult, TextEmbedder};
use listing_matcher::processing::CancelFlag;
use listing_matcher::repository::{CatalogReader, RepositoryError, RepositoryResult};
use listing_matcher::verifier::{Judge, JudgeError, JudgeRequest};

const FAKE_DIM: usize = 256;

/// Deterministic character-count embedder.
///
/// Role prefixes are ignored so identical titles embed identically whatever
/// their catalog.
#[derive(Default)]
pub struct FakeEmbedder {
    pub texts_seen: AtomicUsize,
    pub fail: bool,
}

impl TextEmbedder for FakeEmbedder {
    fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if self.fail {
            return Err(EmbeddingError::InferenceFailed("injected failure".to_string()));
        }
        self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let body = text
                    .strip_prefix("query: ")
                    .or_else(|| text.strip_prefix("passage: "))
                    .unwrap_or(text);
                let mut vector = vec![0.0_f32; FAKE_DIM];
                for c in body.chars() {
                    vector[c as usize % FAKE_DIM] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// Embeds like [`FakeEmbedder`] but sets `cancel` while doing so, as when a
/// newer request arrives mid-job.
pub struct CancelOnEmbed {
    pub inner: FakeEmbedder,
    pub cancel: CancelFlag,
}

impl TextEmbedder for CancelOnEmbed {
    fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        self.cancel.cancel();
        self.inner.embed(texts)
    }
}

/// Embeds like [`FakeEmbedder`] once a signal arrives on `gate`, failing
/// if none comes within two seconds.
pub struct GatedEmbedder {
    pub inner: FakeEmbedder,
    pub gate: Mutex<Receiver<()>>,
}

impl TextEmbedder for GatedEmbedder {
    fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        self.gate
            .lock()
            .map_err(|_| EmbeddingError::InferenceFailed("gate poisoned".to_string()))?
            .recv_timeout(Duration::from_secs(2))
            .map_err(|error| EmbeddingError::InferenceFailed(error.to_string()))?;
        self.inner.embed(texts)
    }
}

/// Both catalogs held as plain vectors.
pub struct MemoryCatalog {
    pub listings: Vec<Listing>,
}

impl CatalogReader for MemoryCatalog {
    fn list_categories(&self) -> RepositoryResult<Vec<String>> {
        let mut categories: Vec<String> =
            self.listings.iter().map(|l| l.query_category.clone()).collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    fn list_listings(&self, source: SourceTag, category: &str) -> RepositoryResult<Vec<Listing>> {
        Ok(self
            .listings
            .iter()
            .filter(|l| l.source_tag == source && l.query_category == category)
            .cloned()
            .collect())
    }

    fn get_listing(&self, source: SourceTag, id: i64) -> RepositoryResult<Listing> {
        self.listings
            .iter()
            .find(|l| l.source_tag == source && l.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("listing {id}")))
    }
}

pub fn engine(embedder: Arc<FakeEmbedder>) -> EmbeddingEngine {
    EmbeddingEngine::new(embedder)
}

pub fn listing(id: i64, title: &str, source: SourceTag) -> Listing {
    Listing {
        id,
        sku: format!("SKU{id}"),
        title: title.to_string(),
        price: Some(1000.0),
        image_url: format!("https://img.example/{id}.jpg"),
        source_url: format!("https://shop.example/{id}"),
        source_tag: source,
        query_category: "dyson".to_string(),
    }
}

fn verdict_json(is_match: bool, confidence: &str, reasoning: &str) -> String {
    format!(r#"{{"is_match": {is_match}, "confidence": "{confidence}", "reasoning": "{reasoning}"}}"#)
}

/// Judge applying the bundle and compatible-accessory keyword rules, answering
/// inside a markdown fence the way chat models often do.
#[derive(Default)]
pub struct RuleJudge {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<JudgeRequest>>,
}

impl RuleJudge {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn rule_verdict(candidate_title: &str) -> String {
    const BUNDLE: [&str; 5] = ["組合", "套組", "多入", "×2", "含2支"];
    const COMPATIBLE: [&str; 5] = ["副廠", "相容", "適用", "通用", "compatible"];

    if BUNDLE.iter().any(|k| candidate_title.contains(k)) {
        verdict_json(false, "high", "bundle vs single item: 組合包與單品不同")
    } else if COMPATIBLE.iter().any(|k| candidate_title.contains(k)) {
        verdict_json(false, "high", "compatible accessory: 副廠相容配件")
    } else {
        verdict_json(true, "high", "same model, color only: 僅顏色不同")
    }
}

#[async_trait]
impl Judge for RuleJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .expect("seen mutex poisoned")
            .push(request.clone());
        Ok(format!("```json\n{}\n```", rule_verdict(&request.candidate_title)))
    }
}

/// Fails for candidates whose title contains `marker`, otherwise says match.
pub struct FlakyJudge {
    pub marker: &'static str,
}

#[async_trait]
impl Judge for FlakyJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, JudgeError> {
        if request.candidate_title.contains(self.marker) {
            return Err(JudgeError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(verdict_json(true, "medium", "ok"))
    }
}

/// Sets `cancel` when its `cancel_on`-th call starts.
pub struct CancellingJudge {
    pub calls: AtomicUsize,
    pub cancel_on: usize,
    pub cancel: CancelFlag,
}

#[async_trait]
impl Judge for CancellingJudge {
    async fn judge(&self, _request: &JudgeRequest) -> Result<String, JudgeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.cancel_on {
            self.cancel.cancel();
        }
        Ok(verdict_json(true, "high", "ok"))
    }
}

/// Answers slower for candidates earlier in the pool so that completion
/// order is the reverse of request order.
pub struct SlowFirstJudge;

#[async_trait]
impl Judge for SlowFirstJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, JudgeError> {
        let rank: u64 = request
            .candidate_title
            .rsplit(' ')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(50_u64.saturating_sub(rank * 10))).await;
        Ok(verdict_json(true, "high", "ok"))
    }
}

/// Collects progress events.
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<(usize, usize, String)>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<(usize, usize, String)> {
        self.events.lock().expect("events mutex poisoned").clone()
    }
}

impl listing_matcher::processing::ProgressSink for RecordingProgress {
    fn report(&self, done: usize, total: usize, message: &str) {
        self.events
            .lock()
            .expect("events mutex poisoned")
            .push((done, total, message.to_string()));
    }
}
