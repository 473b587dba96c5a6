use crate::error::{Result, SearchError};
use crate::search::filter::{FilteredCandidate, MetadataFilter, PriceRange};
use serde::{Deserialize, Serialize};

/// Search request as received over the service boundary
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Signed so that non-positive values surface as invalid arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
}

/// Validated query parameters
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub top_k: usize,
    pub filter: MetadataFilter,
}

impl SearchRequest {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            ..Default::default()
        }
    }

    /// Validate parameters, falling back to `default_top_k` when none was given
    pub fn plan(&self, default_top_k: usize) -> Result<QueryPlan> {
        let top_k = match self.top_k {
            None => default_top_k,
            Some(k) if k > 0 => usize::try_from(k).map_err(|_| {
                SearchError::InvalidArgument(format!("top_k {} is out of range", k))
            })?,
            Some(k) => {
                return Err(SearchError::InvalidArgument(format!(
                    "top_k must be a positive integer, got {}",
                    k
                )))
            }
        };

        let price = PriceRange::new(self.min_price, self.max_price)?;
        Ok(QueryPlan {
            top_k,
            filter: MetadataFilter::new(price, self.brand.as_deref()),
        })
    }
}

/// Catalog item projection returned to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub brand: String,
    pub price: f64,
    pub image_url: String,
    pub product_url: String,
    pub review: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredProduct {
    pub score: f32,
    pub product: Product,
}

impl From<FilteredCandidate> for ScoredProduct {
    fn from(candidate: FilteredCandidate) -> Self {
        let FilteredCandidate { neighbor, price } = candidate;
        let metadata = neighbor.metadata;
        Self {
            score: neighbor.score,
            product: Product {
                brand: metadata.brand,
                price,
                image_url: metadata.image_url,
                product_url: metadata.product_url,
                review: metadata.review,
            },
        }
    }
}

/// Ranked results plus the number of qualifying candidates before truncation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<ScoredProduct>,
    pub total_found: usize,
}

/// Error payload of a failed request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&SearchError> for ErrorBody {
    fn from(err: &SearchError) -> Self {
        Self {
            error: err.public_message(),
        }
    }
}
