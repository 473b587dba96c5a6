use crate::config::EmbedderKind;
use crate::error::{Result, SearchError};
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default HuggingFace Hub endpoint
const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";

/// Revision of the CLIP repository that ships `model.safetensors`
const CLIP_REVISION: &str = "refs/pr/15";

const WEIGHTS_FILE: &str = "model.safetensors";

/// Paths to the required model files
pub struct ModelFiles {
    /// Path to model.safetensors
    pub weights: PathBuf,
}

/// HuggingFace Hub client for downloading embedding models
///
/// Supported environment variables:
/// - `HF_ENDPOINT`: Custom Hub endpoint URL (e.g., an Artifactory mirror)
/// - `HF_HOME`: Custom cache directory (default: `~/.cache/huggingface/`)
/// - `HF_TOKEN`: Authentication token for private models
pub struct ModelHub {
    api: Api,
}

impl ModelHub {
    /// Create a new ModelHub, reading configuration from environment variables.
    pub fn new() -> Result<Self> {
        let endpoint =
            std::env::var("HF_ENDPOINT").unwrap_or_else(|_| DEFAULT_HF_ENDPOINT.to_string());

        info!(endpoint = %endpoint, "Initializing HuggingFace Hub API");

        let api = ApiBuilder::from_env()
            .with_endpoint(endpoint)
            .with_progress(true)
            .build()
            .map_err(|e| {
                SearchError::ModelDownload(format!(
                    "Failed to initialize HuggingFace Hub API: {}",
                    e
                ))
            })?;
        Ok(Self { api })
    }

    fn repo_for(kind: &EmbedderKind) -> Result<Repo> {
        let repo_id = kind.hf_repo_id().ok_or_else(|| {
            SearchError::Config(format!("Embedder '{}' has no downloadable weights", kind))
        })?;
        Ok(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Model,
            CLIP_REVISION.to_string(),
        ))
    }

    /// Download (or retrieve from cache) all required model files
    pub fn get_model_files(&self, kind: &EmbedderKind) -> Result<ModelFiles> {
        let repo = self.api.repo(Self::repo_for(kind)?);

        info!(model = %kind, "Resolving model files from HuggingFace Hub");

        let weights = self.get_file(&repo, WEIGHTS_FILE, kind)?;

        info!(weights = %weights.display(), "Model files resolved");

        Ok(ModelFiles { weights })
    }

    /// Check if all required model files are already cached
    pub fn is_cached(kind: &EmbedderKind) -> bool {
        let Ok(repo) = Self::repo_for(kind) else {
            return false;
        };
        hf_hub::Cache::default()
            .repo(repo)
            .get(WEIGHTS_FILE)
            .is_some()
    }

    fn get_file(&self, repo: &ApiRepo, filename: &str, kind: &EmbedderKind) -> Result<PathBuf> {
        debug!(file = %filename, "Fetching model file");
        let fetch_result = if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| handle.block_on(repo.get(filename)))
        } else {
            let runtime = tokio::runtime::Runtime::new().map_err(|e| {
                SearchError::ModelDownload(format!(
                    "Failed to create Tokio runtime for model download: {}",
                    e
                ))
            })?;
            runtime.block_on(repo.get(filename))
        };

        fetch_result.map_err(|e| {
            SearchError::ModelDownload(format!(
                "Failed to download '{}' for {}: {}\n\
                 Ensure you have internet access or the model is already cached.",
                filename, kind, e,
            ))
        })
    }
}

/// Resolve model files with fallback: custom path > local directory > hf-hub download
pub fn resolve_model_files(
    kind: &EmbedderKind,
    custom_model_path: Option<&Path>,
) -> Result<ModelFiles> {
    if let Some(model_dir) = custom_model_path {
        let weights = model_dir.join(WEIGHTS_FILE);
        if !weights.exists() {
            return Err(SearchError::Config(format!(
                "Model weights not found: {}",
                weights.display()
            )));
        }
        info!(path = %model_dir.display(), "Using custom model path");
        return Ok(ModelFiles { weights });
    }

    if let Some(default_path) = kind.default_model_path() {
        let weights = default_path.join(WEIGHTS_FILE);
        if weights.exists() {
            info!(path = %default_path.display(), "Using local model files");
            return Ok(ModelFiles { weights });
        }
    }

    if ModelHub::is_cached(kind) {
        info!("Model found in HuggingFace cache");
    } else {
        info!(model = %kind, "Model not found locally, downloading from HuggingFace Hub");
    }

    let hub = ModelHub::new()?;
    hub.get_model_files(kind)
}
