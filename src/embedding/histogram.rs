use crate::embedding::preprocess::{l2_normalize, to_rgb};
use crate::embedding::{check_output, ImageEmbedder, ImageVector};
use crate::error::{Result, SearchError};
use image::DynamicImage;

/// Joint RGB color histogram embedder.
///
/// Each channel is quantized into `bins` buckets and the image becomes the
/// L2-normalized count of pixels per `(r, g, b)` bucket, giving `bins^3`
/// dimensions. Deterministic and weight-free; it captures color similarity only.
#[derive(Debug)]
pub struct HistogramEmbedder {
    bins: usize,
    model_name: String,
}

/// Accepted bins per channel; one bucket per 8-bit value at most
pub const MIN_BINS: usize = 2;
pub const MAX_BINS: usize = 256;

impl HistogramEmbedder {
    pub fn new(bins: usize) -> Result<Self> {
        if !(MIN_BINS..=MAX_BINS).contains(&bins) {
            return Err(SearchError::Config(format!(
                "histogram_bins must be between {} and {}, got {}",
                MIN_BINS, MAX_BINS, bins
            )));
        }
        Ok(Self {
            bins,
            model_name: format!("rgb-histogram-{}", bins),
        })
    }

    fn bucket(&self, value: u8) -> usize {
        value as usize * self.bins / 256
    }
}

impl ImageEmbedder for HistogramEmbedder {
    fn dimension(&self) -> usize {
        self.bins * self.bins * self.bins
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<ImageVector> {
        let rgb = to_rgb(image);
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(SearchError::Decode("Image has no pixels".to_string()));
        }

        let mut histogram = vec![0.0f32; self.dimension()];
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            let idx = (self.bucket(r) * self.bins + self.bucket(g)) * self.bins + self.bucket(b);
            histogram[idx] += 1.0;
        }

        l2_normalize(&mut histogram);
        check_output(self.dimension(), &histogram)?;
        Ok(histogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn solid(color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(color)))
    }

    #[test]
    fn test_dimension_is_constant() {
        let embedder = HistogramEmbedder::new(8).unwrap();
        assert_eq!(embedder.dimension(), 512);
        for color in [[0, 0, 0], [255, 0, 0], [12, 200, 99]] {
            assert_eq!(embedder.embed_image(&solid(color)).unwrap().len(), 512);
        }
    }

    #[test]
    fn test_bins_outside_range_rejected() {
        for bins in [0, 1, 257, 300] {
            assert!(matches!(
                HistogramEmbedder::new(bins),
                Err(SearchError::Config(_))
            ));
        }
        let widest = HistogramEmbedder::new(256).unwrap();
        assert_eq!(widest.model_name(), "rgb-histogram-256");
    }

    #[test]
    fn test_deterministic_and_unit_length() {
        let embedder = HistogramEmbedder::new(4).unwrap();
        let a = embedder.embed_image(&solid([200, 10, 10])).unwrap();
        let b = embedder.embed_image(&solid([200, 10, 10])).unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_colors_score_higher() {
        let embedder = HistogramEmbedder::new(4).unwrap();
        let red = embedder.embed_image(&solid([230, 20, 20])).unwrap();
        let dark_red = embedder.embed_image(&solid([200, 30, 30])).unwrap();
        let blue = embedder.embed_image(&solid([20, 20, 230])).unwrap();

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&red, &dark_red) > dot(&red, &blue));
    }

    #[test]
    fn test_color_space_normalized_before_embedding() {
        let embedder = HistogramEmbedder::new(4).unwrap();
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([100])));
        let rgb = solid([100, 100, 100]);
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([100, 100, 100, 10])));

        let expected = embedder.embed_image(&rgb).unwrap();
        assert_eq!(embedder.embed_image(&gray).unwrap(), expected);
        assert_eq!(embedder.embed_image(&rgba).unwrap(), expected);
    }

    #[test]
    fn test_embed_bytes_decodes_or_fails() {
        let embedder = HistogramEmbedder::new(4).unwrap();
        let mut buf = Cursor::new(Vec::new());
        solid([1, 2, 3]).write_to(&mut buf, ImageFormat::Png).unwrap();

        assert_eq!(embedder.embed_bytes(buf.get_ref()).unwrap().len(), 64);
        assert!(matches!(
            embedder.embed_bytes(b"<html>not found</html>"),
            Err(SearchError::Decode(_))
        ));
    }
}
