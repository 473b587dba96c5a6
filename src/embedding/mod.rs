//! Image embedding backends.
//!
//! Every backend turns an image into a fixed-length vector through
//! [`ImageEmbedder`]. Color space is normalized to RGB before any backend
//! sees pixels, so grayscale, palette and alpha images embed consistently
//! on the ingestion and query paths.

#[cfg(feature = "embedding")]
pub mod clip;
pub mod histogram;
#[cfg(feature = "embedding")]
pub mod hub;
pub mod preprocess;

#[cfg(feature = "embedding")]
pub use clip::ClipEmbedder;
pub use histogram::HistogramEmbedder;

use crate::config::{Config, EmbedderKind};
use crate::error::{Result, SearchError};
use image::DynamicImage;
use std::sync::Arc;

/// Embedding vector of an image
pub type ImageVector = Vec<f32>;

/// Opaque image -> vector function with a fixed dimensionality
pub trait ImageEmbedder: Send + Sync {
    /// Length of every produced vector
    fn dimension(&self) -> usize;

    /// Stable model identifier, recorded in the index
    fn model_name(&self) -> &str;

    /// Embed an already decoded image
    fn embed_image(&self, image: &DynamicImage) -> Result<ImageVector>;

    /// Decode raw bytes and embed them
    fn embed_bytes(&self, bytes: &[u8]) -> Result<ImageVector> {
        let image = preprocess::decode_image(bytes)?;
        self.embed_image(&image)
    }

    /// Embed several images; backends with batched inference override this
    fn embed_batch(&self, images: &[DynamicImage]) -> Result<Vec<ImageVector>> {
        images.iter().map(|image| self.embed_image(image)).collect()
    }
}

/// Build the embedder selected by the configuration
pub fn create_embedder(config: &Config) -> Result<Arc<dyn ImageEmbedder>> {
    match config.embedder {
        EmbedderKind::Histogram => Ok(Arc::new(HistogramEmbedder::new(config.histogram_bins)?)),

        #[cfg(feature = "embedding")]
        EmbedderKind::Clip => {
            let files = hub::resolve_model_files(&config.embedder, config.model_path.as_deref())?;
            Ok(Arc::new(ClipEmbedder::load(&files)?))
        }

        #[cfg(not(feature = "embedding"))]
        EmbedderKind::Clip => Err(SearchError::Config(
            "Built without the `embedding` feature; use the histogram embedder".to_string(),
        )),
    }
}

/// Check a produced vector before it leaves an embedder
pub(crate) fn check_output(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(SearchError::Model(format!(
            "Model produced {} values, expected {}",
            vector.len(),
            expected
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(SearchError::Model(
            "Embedding contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_histogram_embedder() {
        let mut config = Config::default();
        config.embedder = EmbedderKind::Histogram;
        config.histogram_bins = 4;

        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 64);
        assert_eq!(embedder.model_name(), "rgb-histogram-4");
    }

    #[test]
    fn test_check_output() {
        assert!(check_output(2, &[0.1, 0.2]).is_ok());
        assert!(matches!(
            check_output(3, &[0.1, 0.2]),
            Err(SearchError::Model(_))
        ));
        assert!(matches!(
            check_output(2, &[0.1, f32::INFINITY]),
            Err(SearchError::Model(_))
        ));
    }
}
