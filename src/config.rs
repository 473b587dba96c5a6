use crate::embedding::histogram;
use crate::error::{Result, SearchError};
use crate::index::Metric;
use crate::search::OverFetchPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Image embedding backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedderKind {
    /// CLIP ViT-B/32 vision tower (512 dim)
    #[default]
    Clip,
    /// RGB color histogram (bins^3 dim, no model weights needed)
    Histogram,
}

impl EmbedderKind {
    /// Default model directory path
    pub fn default_model_path(&self) -> Option<PathBuf> {
        match self {
            EmbedderKind::Clip => Some(PathBuf::from("models/clip-vit-base-patch32")),
            EmbedderKind::Histogram => None,
        }
    }

    /// HuggingFace repository holding the model weights
    pub fn hf_repo_id(&self) -> Option<&'static str> {
        match self {
            EmbedderKind::Clip => Some("openai/clip-vit-base-patch32"),
            EmbedderKind::Histogram => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            EmbedderKind::Clip => "clip-vit-base-patch32",
            EmbedderKind::Histogram => "rgb-histogram",
        }
    }
}

impl std::fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file path
    pub db_path: PathBuf,

    /// Embedding backend, fixed for the lifetime of an index
    pub embedder: EmbedderKind,

    /// Custom model directory holding model.safetensors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    /// Bins per channel for the histogram embedder
    pub histogram_bins: usize,

    /// Images per embedding batch during ingestion
    pub batch_size: usize,

    /// Similarity metric declared at index creation
    pub metric: Metric,

    /// Default number of results when a request omits top_k
    pub top_k: usize,

    /// Candidate over-fetch applied before metadata filtering
    pub over_fetch: OverFetchPolicy,

    /// Timeout for fetching remote images, in seconds
    pub fetch_timeout_secs: u64,

    /// Field delimiter of catalog files
    pub csv_delimiter: char,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("product_index.db"),
            embedder: EmbedderKind::default(),
            model_path: None,
            histogram_bins: 8,
            batch_size: 16,
            metric: Metric::Cosine,
            top_k: 5,
            over_fetch: OverFetchPolicy::default(),
            fetch_timeout_secs: 10,
            csv_delimiter: ';',
        }
    }
}

impl Config {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            ..Default::default()
        }
    }

    /// Starting point written by `init-config`
    pub fn example() -> Self {
        let embedder = EmbedderKind::default();
        Self {
            model_path: embedder.default_model_path(),
            embedder,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| SearchError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SearchError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(SearchError::Config("top_k must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(SearchError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(SearchError::Config(
                "fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.embedder == EmbedderKind::Histogram
            && !(histogram::MIN_BINS..=histogram::MAX_BINS).contains(&self.histogram_bins)
        {
            return Err(SearchError::Config(format!(
                "histogram_bins must be between {} and {}",
                histogram::MIN_BINS,
                histogram::MAX_BINS
            )));
        }
        if !self.csv_delimiter.is_ascii() {
            return Err(SearchError::Config(
                "csv_delimiter must be a single ASCII character".to_string(),
            ));
        }
        self.over_fetch.validate()
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_service() {
        let config = Config::default();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.csv_delimiter, ';');
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.toml");

        let mut config = Config::new(PathBuf::from("catalog.db"));
        config.embedder = EmbedderKind::Histogram;
        config.over_fetch = OverFetchPolicy {
            multiplier: 3,
            minimum: 30,
        };
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.db_path, PathBuf::from("catalog.db"));
        assert_eq!(loaded.embedder, EmbedderKind::Histogram);
        assert_eq!(loaded.over_fetch.multiplier, 3);
        assert_eq!(loaded.over_fetch.minimum, 30);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.toml");
        std::fs::write(&path, "db_path = \"other.db\"\ntop_k = 8\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.db_path, PathBuf::from("other.db"));
        assert_eq!(loaded.top_k, 8);
        assert_eq!(loaded.fetch_timeout_secs, 10);
        assert_eq!(loaded.embedder, EmbedderKind::Clip);
    }

    #[test]
    fn test_example_is_valid_and_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.toml");
        Config::example().to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(
            loaded.model_path,
            Some(PathBuf::from("models/clip-vit-base-patch32"))
        );
        assert_eq!(loaded.over_fetch.multiplier, 10);
    }

    #[test]
    fn test_histogram_bins_out_of_range() {
        let mut config = Config::new(PathBuf::from("index.db"));
        config.embedder = EmbedderKind::Histogram;
        for bins in [0, 1, 257, 300] {
            config.histogram_bins = bins;
            assert!(matches!(config.validate(), Err(SearchError::Config(_))));
        }
        for bins in [2, 256] {
            config.histogram_bins = bins;
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.toml");
        std::fs::write(&path, "top_k = 0\n").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(SearchError::Config(_))
        ));
    }
}
