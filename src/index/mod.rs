//! Vector index abstraction.
//!
//! An index stores `(id, vector, metadata)` entries of a fixed dimensionality and
//! answers top-k similarity queries under a metric declared at creation time.
//! [`BruteForceIndex`] is the exact reference backend; [`SqliteVecIndex`] persists
//! entries with sqlite-vec.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::BruteForceIndex;
pub use sqlite::SqliteVecIndex;

use crate::embedding::ImageVector;
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};

/// Similarity metric, fixed per index instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    /// Cosine similarity in [-1, 1]
    #[default]
    Cosine,
    /// Raw dot product
    InnerProduct,
}

impl Metric {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::InnerProduct => "inner-product",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Metric::Cosine),
            "inner-product" => Some(Metric::InnerProduct),
            _ => None,
        }
    }

    /// Similarity between two vectors of equal length; higher is closer
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Metric::InnerProduct => dot,
            Metric::Cosine => {
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Catalog metadata stored next to each vector.
///
/// `price` keeps the catalog's currency-formatted text; it is parsed at
/// filter time so malformed values only affect the candidate that carries them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub brand: String,
    pub price: String,
    pub product_url: String,
    pub image_url: String,
    pub review: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
}

/// A persisted index entry
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: ImageVector,
    pub metadata: ItemMetadata,
}

/// One query hit
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub score: f32,
    pub metadata: ItemMetadata,
}

/// Contract shared by every index backend.
///
/// Implementations must replace an entry as a whole on upsert: a concurrent
/// query observes either the previous or the new `(vector, metadata)` pair.
pub trait VectorIndex: Send + Sync {
    /// Vector length accepted by this index
    fn dimension(&self) -> usize;

    /// Metric used to rank query results
    fn metric(&self) -> Metric;

    /// Insert or replace the entry for `id`
    fn upsert(&self, id: &str, vector: &[f32], metadata: &ItemMetadata) -> Result<()>;

    /// Up to `top_k` entries ordered by non-increasing score
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<Neighbor>>;

    /// Metadata for a single id
    fn get(&self, id: &str) -> Result<Option<ItemMetadata>>;

    /// Number of stored entries
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn upsert_entry(&self, entry: &IndexEntry) -> Result<()> {
        self.upsert(&entry.id, &entry.vector, &entry.metadata)
    }
}

pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(SearchError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_finite(vector: &[f32]) -> Result<()> {
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(SearchError::InvalidArgument(
            "vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(SearchError::InvalidArgument(
            "top_k must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_score() {
        let m = Metric::Cosine;
        assert!((m.score(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(m.score(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((m.score(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(m.score(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_inner_product_score_is_unnormalized() {
        let m = Metric::InnerProduct;
        assert!((m.score(&[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_db_str_roundtrip() {
        for m in [Metric::Cosine, Metric::InnerProduct] {
            assert_eq!(Metric::from_db_str(m.as_db_str()), Some(m));
        }
        assert_eq!(Metric::from_db_str("l2"), None);
    }

    #[test]
    fn test_check_dimension_never_pads() {
        assert!(check_dimension(3, &[1.0, 2.0, 3.0]).is_ok());
        assert!(matches!(
            check_dimension(3, &[1.0, 2.0]),
            Err(SearchError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            check_dimension(3, &[1.0, 2.0, 3.0, 4.0]),
            Err(SearchError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }
}
