use crate::embedding::hub::ModelFiles;
use crate::embedding::preprocess::{l2_normalize, pixel_values};
use crate::embedding::{check_output, ImageEmbedder, ImageVector};
use crate::error::{Result, SearchError};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use image::DynamicImage;

/// Output size of the ViT-B/32 image projection
pub const CLIP_DIMENSION: usize = 512;

const MODEL_NAME: &str = "clip-vit-base-patch32";

/// CLIP ViT-B/32 image encoder.
///
/// Images are normalized to RGB, resized and center-cropped to the model's
/// input resolution, projected to 512 dimensions and L2-normalized so that
/// inner product and cosine similarity agree.
pub struct ClipEmbedder {
    model: ClipModel,
    device: Device,
    image_size: usize,
}

impl ClipEmbedder {
    /// Select the best available device (GPU -> CPU fallback)
    fn select_device() -> Device {
        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => {
                    tracing::info!("Using CUDA GPU for image embeddings");
                    return device;
                }
                Err(e) => {
                    tracing::warn!("CUDA GPU unavailable ({}), falling back to CPU", e);
                }
            }
        }

        #[cfg(feature = "accelerate")]
        {
            tracing::info!("Using CPU with Apple Accelerate framework");
        }
        #[cfg(not(feature = "accelerate"))]
        {
            tracing::info!("Using CPU for image embeddings");
        }
        Device::Cpu
    }

    /// Load the CLIP weights from resolved model files
    pub fn load(files: &ModelFiles) -> Result<Self> {
        let device = Self::select_device();
        let config = ClipConfig::vit_base_patch32();

        if !files.weights.exists() {
            return Err(SearchError::Config(format!(
                "Model weights not found: {}",
                files.weights.display()
            )));
        }

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights.as_path()], DType::F32, &device)
                .map_err(|e| SearchError::Model(format!("Failed to load weights: {}", e)))?
        };
        let model = ClipModel::new(vb, &config)
            .map_err(|e| SearchError::Model(format!("Failed to load model: {}", e)))?;

        Ok(Self {
            model,
            device,
            image_size: config.image_size,
        })
    }

    fn pixel_tensor(&self, image: &DynamicImage) -> Result<Tensor> {
        let size = self.image_size;
        let values = pixel_values(image, size as u32)?;
        Tensor::from_vec(values, (3, size, size), &self.device)
            .map_err(|e| SearchError::Model(format!("Failed to create pixel tensor: {}", e)))
    }

    fn forward(&self, pixels: &Tensor) -> Result<Vec<ImageVector>> {
        let features = self
            .model
            .get_image_features(pixels)
            .map_err(|e| SearchError::Model(format!("Vision forward failed: {}", e)))?;

        let rows = features
            .to_dtype(DType::F32)
            .and_then(|t| t.to_vec2::<f32>())
            .map_err(|e| SearchError::Model(format!("Conversion failed: {}", e)))?;

        rows.into_iter()
            .map(|mut row| {
                check_output(CLIP_DIMENSION, &row)?;
                l2_normalize(&mut row);
                Ok(row)
            })
            .collect()
    }
}

impl ImageEmbedder for ClipEmbedder {
    fn dimension(&self) -> usize {
        CLIP_DIMENSION
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<ImageVector> {
        let pixels = self
            .pixel_tensor(image)?
            .unsqueeze(0)
            .map_err(|e| SearchError::Model(format!("Unsqueeze failed: {}", e)))?;

        self.forward(&pixels)?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Model("No embedding generated".to_string()))
    }

    fn embed_batch(&self, images: &[DynamicImage]) -> Result<Vec<ImageVector>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let tensors = images
            .iter()
            .map(|image| self.pixel_tensor(image))
            .collect::<Result<Vec<_>>>()?;
        let batch = Tensor::stack(&tensors, 0)
            .map_err(|e| SearchError::Model(format!("Failed to stack batch: {}", e)))?;

        let embeddings = self.forward(&batch)?;
        if embeddings.len() != images.len() {
            return Err(SearchError::Model(format!(
                "Model returned {} embeddings for {} images",
                embeddings.len(),
                images.len()
            )));
        }
        Ok(embeddings)
    }
}
