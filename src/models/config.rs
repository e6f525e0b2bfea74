//! Configuration model loaded from external sources.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::listing::{InvalidThreshold, MatchThreshold};
use crate::embedding::loader::ModelSources;
use crate::processing::matcher::MatcherSettings;
use crate::verifier::gemini::GeminiSettings;
use crate::{DEFAULT_MATCH_THRESHOLD, MAX_CANDIDATE_POOL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error(transparent)]
    Threshold(#[from] InvalidThreshold),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("no Gemini API key: set MATCHER_GEMINI_API_KEY or GEMINI_API_KEY")]
    MissingApiKey,
}

#[derive(Clone, Debug, Deserialize)]
/// Settings for the matching worker.
pub struct MatcherConfig {
    pub catalog_a_path: PathBuf,
    pub catalog_b_path: PathBuf,
    pub zmq_address: String,
    pub match_threshold: f32,
    pub max_candidates: usize,
    pub verify_concurrency: usize,
    pub model_path: Option<PathBuf>,
    pub model_name: Option<String>,
    pub model_archive_url: Option<String>,
    pub model_cache_dir: PathBuf,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub request_timeout_secs: u64,
}

/// The configured key, else the plain environment key. Blank values count
/// as unset.
fn resolve_api_key(configured: Option<String>, fallback: Option<String>) -> Option<String> {
    configured
        .filter(|key| !key.trim().is_empty())
        .or_else(|| fallback.filter(|key| !key.trim().is_empty()))
}

impl MatcherConfig {
    /// Defaults, then `config/default.yaml` if present, then `MATCHER_*`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("catalog_a_path", "momo.csv")?
            .set_default("catalog_b_path", "pchome.csv")?
            .set_default("zmq_address", "tcp://127.0.0.1:5555")?
            .set_default("match_threshold", f64::from(DEFAULT_MATCH_THRESHOLD))?
            .set_default("max_candidates", MAX_CANDIDATE_POOL as u64)?
            .set_default("verify_concurrency", 1_u64)?
            .set_default("model_path", "models/multilingual-e5-large")?
            .set_default("model_name", "Qdrant/multilingual-e5-large-onnx")?
            .set_default("model_cache_dir", ".fastembed_cache")?
            .set_default("gemini_model", "gemini-2.5-flash")?
            .set_default("gemini_base_url", "https://generativelanguage.googleapis.com")?
            .set_default("request_timeout_secs", 60_u64)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("MATCHER").try_parsing(true))
            .build()?;

        let mut config: MatcherConfig = settings.try_deserialize()?;
        config.gemini_api_key = resolve_api_key(
            config.gemini_api_key.take(),
            std::env::var("GEMINI_API_KEY").ok(),
        );
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        MatchThreshold::new(self.match_threshold)?;
        if self.max_candidates == 0 {
            return Err(ConfigError::Zero("max_candidates"));
        }
        if self.verify_concurrency == 0 {
            return Err(ConfigError::Zero("verify_concurrency"));
        }
        Ok(())
    }

    pub fn threshold(&self) -> Result<MatchThreshold, ConfigError> {
        Ok(MatchThreshold::new(self.match_threshold)?)
    }

    pub fn matcher_settings(&self) -> MatcherSettings {
        MatcherSettings {
            max_candidates: self.max_candidates,
            verify_concurrency: self.verify_concurrency,
        }
    }

    pub fn model_sources(&self) -> ModelSources {
        ModelSources {
            local_path: self.model_path.clone(),
            remote_name: self.model_name.clone(),
            archive_url: self.model_archive_url.clone(),
            cache_dir: self.model_cache_dir.clone(),
            download_timeout: Duration::from_secs(self.request_timeout_secs.max(1) * 10),
        }
    }

    pub fn gemini_settings(&self) -> Result<GeminiSettings, ConfigError> {
        let api_key = self
            .gemini_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(GeminiSettings {
            api_key,
            model: self.gemini_model.clone(),
            base_url: self.gemini_base_url.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}
