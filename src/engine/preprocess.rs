//! Image preprocessing for embedding extraction

use anyhow::Result;
use image::DynamicImage;
use ndarray::Array4;
use serde::Deserialize;

/// Standard input size for face embedding models (ArcFace family)
pub const EMBEDDER_INPUT_SIZE: u32 = 112;

/// Pixel normalization applied before the forward pass.
///
/// `Auto` defers to the backend default: graph checkpoints (OpenVINO IR)
/// carry their own preprocessing and take raw pixels, while ONNX exports and
/// native Candle weights expect the ArcFace scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    Auto,
    Arcface,
    None,
}

impl Normalization {
    /// Resolve `Auto` against the backend default
    pub fn resolve(self, backend_default: Normalization) -> Normalization {
        match self {
            Normalization::Auto => backend_default,
            other => other,
        }
    }

    fn apply(self, v: f32) -> f32 {
        match self {
            // (x - 127.5) / 128.0
            Normalization::Arcface => (v - 127.5) * 0.0078125,
            _ => v,
        }
    }
}

/// Channel order fed to the model.
///
/// InsightFace models converted from OpenCV pipelines expect BGR; models
/// trained on RGB-decoded inputs take RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Load an image from disk with EXIF orientation applied
pub fn load_image(path: &std::path::Path) -> Result<DynamicImage> {
    let data = std::fs::read(path)?;
    decode_image(&data)
}

/// Decode image from bytes with EXIF orientation handling
/// This ensures images are correctly oriented regardless of how they were captured
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    let oriented_image = apply_exif_orientation(data, image);
    Ok(oriented_image)
}

/// Apply EXIF orientation to correct image rotation
/// Mobile phones often store images with EXIF orientation tags instead of rotating pixels
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1) as u8,
        Err(_) => 1, // No EXIF or error reading, assume normal orientation
    };

    // See: https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        1 => image,
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Stack a set of images into an NCHW batch tensor.
///
/// Each image is resized exactly to `size`×`size` and converted to f32 with
/// the given channel order and normalization.
pub fn batch_to_tensor(
    images: &[DynamicImage],
    size: u32,
    order: ChannelOrder,
    norm: Normalization,
) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((images.len(), 3, size as usize, size as usize));

    for (i, img) in images.iter().enumerate() {
        let resized = img.resize_exact(size, size, image::imageops::FilterType::Lanczos3);
        let rgb = resized.to_rgb8();

        for y in 0..size {
            for x in 0..size {
                let pixel = rgb.get_pixel(x, y);
                let (c0, c1, c2) = match order {
                    ChannelOrder::Rgb => (pixel[0], pixel[1], pixel[2]),
                    ChannelOrder::Bgr => (pixel[2], pixel[1], pixel[0]),
                };
                tensor[[i, 0, y as usize, x as usize]] = norm.apply(c0 as f32);
                tensor[[i, 1, y as usize, x as usize]] = norm.apply(c1 as f32);
                tensor[[i, 2, y as usize, x as usize]] = norm.apply(c2 as f32);
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid_image(r: u8, g: u8, b: u8, w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(w, h, Rgb([r, g, b])))
    }

    #[test]
    fn test_batch_shape() {
        let images = vec![solid_image(0, 0, 0, 50, 70), solid_image(255, 255, 255, 112, 112)];
        let tensor = batch_to_tensor(&images, 112, ChannelOrder::Rgb, Normalization::None);
        assert_eq!(tensor.shape(), &[2, 3, 112, 112]);
    }

    #[test]
    fn test_arcface_normalization() {
        let images = vec![solid_image(200, 100, 50, 112, 112)];
        let tensor = batch_to_tensor(&images, 112, ChannelOrder::Rgb, Normalization::Arcface);
        assert!((tensor[[0, 0, 0, 0]] - (200.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - (100.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - (50.0 - 127.5) / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_bgr_swaps_channels() {
        let images = vec![solid_image(200, 100, 50, 112, 112)];
        let tensor = batch_to_tensor(&images, 112, ChannelOrder::Bgr, Normalization::None);
        assert_eq!(tensor[[0, 0, 0, 0]], 50.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 100.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 200.0);
    }

    #[test]
    fn test_raw_pixels_without_normalization() {
        let images = vec![solid_image(255, 0, 127, 112, 112)];
        let tensor = batch_to_tensor(&images, 112, ChannelOrder::Rgb, Normalization::None);
        assert_eq!(tensor[[0, 0, 0, 0]], 255.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 127.0);
    }

    #[test]
    fn test_resolve_auto() {
        assert_eq!(
            Normalization::Auto.resolve(Normalization::Arcface),
            Normalization::Arcface
        );
        assert_eq!(
            Normalization::None.resolve(Normalization::Arcface),
            Normalization::None
        );
    }

    #[test]
    fn test_decode_from_bytes() {
        let img = solid_image(10, 20, 30, 8, 8);
        let mut buffer = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        let decoded = decode_image(buffer.get_ref()).unwrap();
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }
}
