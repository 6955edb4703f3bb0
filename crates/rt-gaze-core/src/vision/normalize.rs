//! Conversion of eye patches into network input tensors.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// `ImageNet` channel means.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// `ImageNet` channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalizes an RGB patch into CHW float data, resizing it first when needed.
#[must_use]
pub fn patch_to_chw(image: &RgbImage, size: u32) -> Vec<f32> {
    let resized;
    let image = if image.dimensions() == (size, size) {
        image
    } else {
        resized = imageops::resize(image, size, size, FilterType::CatmullRom);
        &resized
    };

    let plane = (size * size) as usize;
    let mut data = vec![0.0_f32; 3 * plane];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            let v = f32::from(pixel[c]) / 255.0;
            data[c * plane + i] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    data
}

/// Builds a `(1, 3, size, size)` tensor from an eye patch.
///
/// # Errors
///
/// Returns an error if tensor creation fails.
pub fn normalize_patch(image: &RgbImage, size: u32, device: &Device) -> Result<Tensor> {
    let s = size as usize;
    Tensor::from_vec(patch_to_chw(image, size), (1, 3, s, s), device)
        .context("Failed to create eye patch tensor")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_shape_and_values() {
        let image = RgbImage::from_pixel(40, 40, image::Rgb([255, 0, 128]));
        let tensor = normalize_patch(&image, 32, &Device::Cpu);
        let tensor = tensor.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tensor.dims(), &[1, 3, 32, 32]);

        let values = tensor
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .unwrap_or_else(|e| panic!("{e}"));
        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = -IMAGENET_MEAN[1] / IMAGENET_STD[1];
        assert!((values[0] - red).abs() < 1e-3);
        assert!((values[32 * 32] - green).abs() < 1e-3);
    }

    #[test]
    fn test_no_resize_when_already_sized() {
        let image = RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        assert_eq!(patch_to_chw(&image, 8).len(), 3 * 64);
    }
}
