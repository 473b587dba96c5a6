use crate::config::Config;
use crate::embedding::{create_embedder, ImageEmbedder};
use crate::error::Result;
use crate::index::sqlite::IndexStats;
use crate::index::SqliteVecIndex;
use crate::ingest::{IngestReport, Ingestor};
use crate::search::{SearchOrchestrator, SearchRequest, SearchResponse};
use crate::source::{HttpImageSource, ImageSource};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Product search service: one embedder, one persistent index, one image source.
///
/// Components are built once in [`ProductSearchApi::open`] and shared by the
/// query and ingestion paths, so both always embed with the same model.
pub struct ProductSearchApi {
    config: Config,
    embedder: Arc<dyn ImageEmbedder>,
    index: Arc<SqliteVecIndex>,
    source: Arc<dyn ImageSource>,
    orchestrator: Arc<SearchOrchestrator>,
}

impl ProductSearchApi {
    /// Load the configured embedder and open the index database
    #[instrument(skip(config), fields(db = %config.db_path.display(), embedder = %config.embedder))]
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        debug!("Loading embedder");
        let embedder = create_embedder(&config)?;
        Self::with_embedder(config, embedder)
    }

    /// Open the index database around an already constructed embedder
    pub fn with_embedder(config: Config, embedder: Arc<dyn ImageEmbedder>) -> Result<Self> {
        let index = Arc::new(SqliteVecIndex::open(
            &config.db_path,
            embedder.dimension(),
            config.metric,
            embedder.model_name(),
        )?);
        let source: Arc<dyn ImageSource> = Arc::new(HttpImageSource::new(config.fetch_timeout())?);

        let orchestrator = Arc::new(SearchOrchestrator::new(
            source.clone(),
            embedder.clone(),
            index.clone(),
            config.over_fetch,
            config.top_k,
        )?);

        info!(
            model = embedder.model_name(),
            dimension = embedder.dimension(),
            "Product search initialized"
        );

        Ok(Self {
            config,
            embedder,
            index,
            source,
            orchestrator,
        })
    }

    /// Shared handle to the query path
    pub fn orchestrator(&self) -> Arc<SearchOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.orchestrator.search(request)
    }

    /// Ingest a catalog file into the index
    #[instrument(skip(self, path), fields(path = %path.as_ref().display(), batch_size = self.config.batch_size))]
    pub fn ingest_file<P: AsRef<Path>>(&self, path: P) -> Result<IngestReport> {
        let ingestor = Ingestor::new(
            self.source.clone(),
            self.embedder.clone(),
            self.index.clone(),
            self.config.batch_size,
            self.config.csv_delimiter,
        )?;
        ingestor.ingest_file(path)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.index.stats()
    }
}
