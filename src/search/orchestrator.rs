use crate::embedding::ImageEmbedder;
use crate::error::{Result, SearchError};
use crate::index::VectorIndex;
use crate::search::policy::OverFetchPolicy;
use crate::search::types::{QueryPlan, ScoredProduct, SearchRequest, SearchResponse};
use crate::source::ImageSource;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Query path: resolve image, embed, over-fetch from the index, filter, truncate.
///
/// Holds no mutable state, so one instance can serve concurrent requests.
pub struct SearchOrchestrator {
    source: Arc<dyn ImageSource>,
    embedder: Arc<dyn ImageEmbedder>,
    index: Arc<dyn VectorIndex>,
    policy: OverFetchPolicy,
    default_top_k: usize,
}

impl SearchOrchestrator {
    pub fn new(
        source: Arc<dyn ImageSource>,
        embedder: Arc<dyn ImageEmbedder>,
        index: Arc<dyn VectorIndex>,
        policy: OverFetchPolicy,
        default_top_k: usize,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            });
        }
        policy.validate()?;

        Ok(Self {
            source,
            embedder,
            index,
            policy,
            default_top_k: default_top_k.max(1),
        })
    }

    /// Run a search for an image reference (URL or local path)
    #[instrument(skip(self, request), fields(image = %request.image_url))]
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let plan = request.plan(self.default_top_k)?;
        let bytes = self.source.fetch(&request.image_url)?;
        self.search_image(&bytes, &plan)
    }

    /// Run a search for already fetched image bytes
    pub fn search_image(&self, bytes: &[u8], plan: &QueryPlan) -> Result<SearchResponse> {
        let vector = self.embedder.embed_bytes(bytes)?;

        let pool = self.policy.candidates(plan.top_k);
        let neighbors = self.index.query(&vector, pool)?;
        let fetched = neighbors.len();

        let mut matches = plan.filter.apply(neighbors);
        let total_found = matches.len();
        matches.truncate(plan.top_k);

        debug!(pool, fetched, total_found, "Candidates filtered");
        info!(
            top_k = plan.top_k,
            returned = matches.len(),
            total_found,
            "Search completed"
        );

        Ok(SearchResponse {
            results: matches.into_iter().map(ScoredProduct::from).collect(),
            total_found,
        })
    }
}
