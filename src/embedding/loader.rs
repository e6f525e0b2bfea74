//! Resolution and one-time loading of the embedding model.
//!
//! Sources are tried in order: local directory, named remote model, archive
//! URL. The first that loads wins. The outcome, success or failure, is cached
//! for the lifetime of the process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, InitOptions, InitOptionsUserDefined, Pooling, TextEmbedding, TokenizerFiles,
    UserDefinedEmbeddingModel,
};
use tokio::sync::OnceCell;

use crate::embedding::archive::fetch_archive;
use crate::embedding::{EmbeddingEngine, EmbeddingError, EmbeddingResult, FastEmbedder, TextEmbedder};

const ONNX_CANDIDATES: [&str; 2] = ["model.onnx", "onnx/model.onnx"];

/// Where the embedding model may be loaded from.
#[derive(Clone, Debug)]
pub struct ModelSources {
    pub local_path: Option<PathBuf>,
    pub remote_name: Option<String>,
    pub archive_url: Option<String>,
    pub cache_dir: PathBuf,
    pub download_timeout: Duration,
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> EmbeddingResult<Arc<dyn TextEmbedder>>;
}

/// Loads a fastembed model from the configured [`ModelSources`].
pub struct FastEmbedLoader {
    sources: ModelSources,
}

impl FastEmbedLoader {
    pub fn new(sources: ModelSources) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl ModelLoader for FastEmbedLoader {
    async fn load(&self) -> EmbeddingResult<Arc<dyn TextEmbedder>> {
        let mut failures = Vec::new();

        if let Some(path) = self.sources.local_path.clone() {
            if path.exists() {
                log::info!("Loading embedding model from local path {}", path.display());
                match run_blocking(move || load_local_model(&path)).await {
                    Ok(model) => return Ok(Arc::new(FastEmbedder::new(model))),
                    Err(error) => {
                        log::warn!("{error}");
                        failures.push(error.to_string());
                    }
                }
            } else {
                log::info!(
                    "Local embedding model {} does not exist, skipping",
                    path.display()
                );
            }
        }

        if let Some(name) = self.sources.remote_name.clone() {
            log::info!("Loading embedding model {name} from the remote model repository");
            let cache_dir = self.sources.cache_dir.clone();
            match run_blocking(move || load_named_model(&name, cache_dir)).await {
                Ok(model) => return Ok(Arc::new(FastEmbedder::new(model))),
                Err(error) => {
                    log::warn!("{error}");
                    failures.push(error.to_string());
                }
            }
        }

        if let Some(url) = self.sources.archive_url.as_deref() {
            log::info!("Downloading embedding model archive from {url}");
            let target = self.sources.cache_dir.join("archive_model");
            let loaded = match fetch_archive(url, &target, self.sources.download_timeout).await {
                Ok(dir) => run_blocking(move || load_local_model(&dir)).await,
                Err(error) => Err(error),
            };
            match loaded {
                Ok(model) => return Ok(Arc::new(FastEmbedder::new(model))),
                Err(error) => {
                    log::warn!("{error}");
                    failures.push(error.to_string());
                }
            }
        }

        if failures.is_empty() {
            return Err(EmbeddingError::ModelUnavailable(
                "no model source configured".to_string(),
            ));
        }
        Err(EmbeddingError::ModelUnavailable(failures.join("; ")))
    }
}

async fn run_blocking<F>(job: F) -> EmbeddingResult<TextEmbedding>
where
    F: FnOnce() -> EmbeddingResult<TextEmbedding> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|error| EmbeddingError::LoadFailed {
            source_name: "loader task".to_string(),
            reason: error.to_string(),
        })?
}

fn read_model_file(dir: &Path, name: &str) -> EmbeddingResult<Vec<u8>> {
    let path = dir.join(name);
    std::fs::read(&path).map_err(|error| EmbeddingError::LoadFailed {
        source_name: dir.display().to_string(),
        reason: format!("cannot read {}: {error}", path.display()),
    })
}

/// Loads an ONNX sentence-embedding export with mean pooling.
pub(crate) fn load_local_model(dir: &Path) -> EmbeddingResult<TextEmbedding> {
    let onnx_path = ONNX_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| EmbeddingError::LoadFailed {
            source_name: dir.display().to_string(),
            reason: "no model.onnx found".to_string(),
        })?;
    let onnx = std::fs::read(&onnx_path).map_err(|error| EmbeddingError::LoadFailed {
        source_name: dir.display().to_string(),
        reason: format!("cannot read {}: {error}", onnx_path.display()),
    })?;

    let tokenizer_files = TokenizerFiles {
        tokenizer_file: read_model_file(dir, "tokenizer.json")?,
        config_file: read_model_file(dir, "config.json")?,
        special_tokens_map_file: read_model_file(dir, "special_tokens_map.json")?,
        tokenizer_config_file: read_model_file(dir, "tokenizer_config.json")?,
    };

    let model = UserDefinedEmbeddingModel::new(onnx, tokenizer_files).with_pooling(Pooling::Mean);
    TextEmbedding::try_new_from_user_defined(model, InitOptionsUserDefined::default()).map_err(
        |error| EmbeddingError::LoadFailed {
            source_name: dir.display().to_string(),
            reason: format!("{error:?}"),
        },
    )
}

/// Finds a fastembed catalogue entry by model code or variant name.
pub(crate) fn resolve_named_model(name: &str) -> Option<EmbeddingModel> {
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| {
            info.model_code.eq_ignore_ascii_case(name)
                || format!("{:?}", info.model).eq_ignore_ascii_case(name)
        })
        .map(|info| info.model)
}

fn load_named_model(name: &str, cache_dir: PathBuf) -> EmbeddingResult<TextEmbedding> {
    let model = resolve_named_model(name).ok_or_else(|| EmbeddingError::LoadFailed {
        source_name: name.to_string(),
        reason: "not a supported remote model".to_string(),
    })?;
    TextEmbedding::try_new(
        InitOptions::new(model)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false),
    )
    .map_err(|error| EmbeddingError::LoadFailed {
        source_name: name.to_string(),
        reason: format!("{error:?}"),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

/// Lazily loaded, read-only model shared by all callers.
///
/// Concurrent first calls wait on the same load. A failed load is remembered
/// and every later caller receives [`EmbeddingError::ModelUnavailable`].
pub struct ModelHandle<L> {
    loader: L,
    cell: OnceCell<Result<Arc<dyn TextEmbedder>, String>>,
    loading: AtomicBool,
}

impl<L: ModelLoader> ModelHandle<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
            loading: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ModelState {
        match self.cell.get() {
            Some(Ok(_)) => ModelState::Ready,
            Some(Err(_)) => ModelState::Failed,
            None if self.loading.load(Ordering::SeqCst) => ModelState::Loading,
            None => ModelState::Uninitialized,
        }
    }

    pub async fn get(&self) -> EmbeddingResult<Arc<dyn TextEmbedder>> {
        let slot = self
            .cell
            .get_or_init(|| async {
                self.loading.store(true, Ordering::SeqCst);
                let outcome = match self.loader.load().await {
                    Ok(embedder) => {
                        log::info!("Embedding model ready");
                        Ok(embedder)
                    }
                    Err(EmbeddingError::ModelUnavailable(reason)) => Err(reason),
                    Err(error) => Err(error.to_string()),
                };
                if let Err(reason) = &outcome {
                    log::error!("Embedding model unavailable: {reason}");
                }
                self.loading.store(false, Ordering::SeqCst);
                outcome
            })
            .await;

        match slot {
            Ok(embedder) => Ok(Arc::clone(embedder)),
            Err(reason) => Err(EmbeddingError::ModelUnavailable(reason.clone())),
        }
    }

    pub async fn engine(&self) -> EmbeddingResult<EmbeddingEngine> {
        Ok(EmbeddingEngine::new(self.get().await?))
    }
}

static SHARED_MODEL: OnceLock<ModelHandle<FastEmbedLoader>> = OnceLock::new();

/// Process-wide model handle. The sources passed by the first caller win.
pub fn shared_model(sources: ModelSources) -> &'static ModelHandle<FastEmbedLoader> {
    SHARED_MODEL.get_or_init(|| ModelHandle::new(FastEmbedLoader::new(sources)))
}
