use crate::error::{Result, SearchError};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

/// Per-channel mean of the CLIP training data
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
/// Per-channel standard deviation of the CLIP training data
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Decode raw bytes into an image, guessing the format from its content
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(SearchError::Decode("Empty image data".to_string()));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| SearchError::Decode(format!("Failed to decode image: {}", e)))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(SearchError::Decode("Image has no pixels".to_string()));
    }
    Ok(image)
}

/// Three-channel RGB view of any image (grayscale, palette and alpha inputs included)
pub fn to_rgb(image: &DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb.clone(),
        other => other.to_rgb8(),
    }
}

/// CLIP-style pixel values in CHW order.
///
/// The shortest edge is resized to `size`, the center `size x size` square is
/// cropped, and each channel is scaled to [0, 1] then standardized with
/// [`CLIP_MEAN`] / [`CLIP_STD`].
pub fn pixel_values(image: &DynamicImage, size: u32) -> Result<Vec<f32>> {
    let rgb = to_rgb(image);
    let (w, h) = rgb.dimensions();
    if w == 0 || h == 0 {
        return Err(SearchError::Decode("Image has no pixels".to_string()));
    }

    let scale = size as f32 / w.min(h) as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(size);
    let new_h = ((h as f32 * scale).round() as u32).max(size);
    let resized = image::imageops::resize(&rgb, new_w, new_h, FilterType::CatmullRom);

    let start_x = (new_w - size) / 2;
    let start_y = (new_h - size) / 2;
    let plane = (size * size) as usize;
    let mut values = vec![0.0f32; 3 * plane];

    for y in 0..size {
        for x in 0..size {
            let pixel = resized.get_pixel(start_x + x, start_y + y);
            let offset = (y * size + x) as usize;
            for c in 0..3 {
                values[c * plane + offset] = (pixel[c] as f32 / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
            }
        }
    }

    Ok(values)
}

/// Scale a vector to unit length in place; zero vectors are left untouched
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
