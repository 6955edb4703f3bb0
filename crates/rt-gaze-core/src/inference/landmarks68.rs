//! 68-point facial landmark regressor.
//!
//! A compact CNN mapping a square RGB face crop to 68 `(x, y)` pairs in
//! crop-relative `[0, 1]` coordinates.
//!
//! Weights: `conv1`..`conv4` (3x3, padding 1) with 32, 64, 128, 256 output
//! channels, each followed by ReLU and 2x2 max pooling, then `fc1`
//! (12544 -> 512) and `fc2` (512 -> 136).

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use candle_core::{Device, Module, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, VarBuilder};
use image::imageops::FilterType;

use crate::domain::{BoundingBox, Landmarks, Point2, NUM_LANDMARKS};

/// Side of the square face crop fed to the network.
pub const CROP_SIZE: usize = 112;

/// Factor the detector box is enlarged by before cropping.
const CROP_SCALE: f32 = 1.2;

const CHANNELS: [usize; 5] = [3, 32, 64, 128, 256];

/// Landmark regression network.
pub struct Landmarks68 {
    convs: Vec<Conv2d>,
    fc1: Linear,
    fc2: Linear,
    device: Device,
}

impl Landmarks68 {
    /// Builds the regressor from weights.
    ///
    /// # Errors
    ///
    /// Returns an error if a weight is missing or has the wrong shape.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(vb: VarBuilder) -> Result<Self> {
        let config = Conv2dConfig {
            padding: 1,
            ..Conv2dConfig::default()
        };
        let convs = CHANNELS
            .windows(2)
            .enumerate()
            .map(|(i, c)| conv2d(c[0], c[1], 3, config, vb.pp(format!("conv{}", i + 1))))
            .collect::<candle_core::Result<Vec<_>>>()?;

        // 112 -> 56 -> 28 -> 14 -> 7
        let side = CROP_SIZE >> 4;
        let fc1 = linear(CHANNELS[4] * side * side, 512, vb.pp("fc1"))?;
        let fc2 = linear(512, NUM_LANDMARKS * 2, vb.pp("fc2"))?;

        Ok(Self {
            convs,
            fc1,
            fc2,
            device: vb.device().clone(),
        })
    }

    /// Square crop region around a detector box, enlarged and clamped to the frame.
    #[must_use]
    pub fn crop_region(face: &BoundingBox, width: u32, height: u32) -> BoundingBox {
        let side = face.width.max(face.height) * CROP_SCALE;
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;
        let x0 = (cx - side / 2.0).max(0.0);
        let y0 = (cy - side / 2.0).max(0.0);
        let x1 = (cx + side / 2.0).min(width as f32);
        let y1 = (cy + side / 2.0).min(height as f32);
        BoundingBox::from_corners(x0.floor(), y0.floor(), x1.floor(), y1.floor())
    }

    /// Converts a face region of `image` into a `(1, 3, 112, 112)` tensor in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if tensor creation fails.
    pub fn preprocess(&self, image: &image::DynamicImage, region: &BoundingBox) -> Result<Tensor> {
        let crop = image
            .crop_imm(
                region.x as u32,
                region.y as u32,
                region.width.max(1.0) as u32,
                region.height.max(1.0) as u32,
            )
            .resize_exact(CROP_SIZE as u32, CROP_SIZE as u32, FilterType::Triangle)
            .to_rgb8();
        let data: Vec<f32> = crop.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();
        Tensor::from_vec(data, (1, CROP_SIZE, CROP_SIZE, 3), &self.device)?
            .permute((0, 3, 1, 2))?
            .contiguous()
            .context("Failed to create face crop tensor")
    }

    /// Predicts landmarks for a detected face, in frame coordinates.
    ///
    /// Returns `None` if the crop region is empty or the output is not finite.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    pub fn predict(&self, image: &image::DynamicImage, face: &BoundingBox) -> Result<Option<Landmarks>> {
        let region = Self::crop_region(face, image.width(), image.height());
        if region.width < 1.0 || region.height < 1.0 {
            return Ok(None);
        }
        let input = self.preprocess(image, &region)?;
        let output = self.forward(&input)?.squeeze(0)?.to_vec1::<f32>()?;
        if output.iter().any(|v| !v.is_finite()) {
            return Ok(None);
        }
        let points = output
            .chunks_exact(2)
            .map(|xy| {
                Point2::new(
                    xy[0].mul_add(region.width, region.x),
                    xy[1].mul_add(region.height, region.y),
                )
            })
            .collect();
        Ok(Landmarks::new(points))
    }
}

impl Module for Landmarks68 {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = x.clone();
        for conv in &self.convs {
            h = conv.forward(&h)?.relu()?.max_pool2d(2)?;
        }
        let h = self.fc1.forward(&h.flatten_from(1)?)?.relu()?;
        self.fc2.forward(&h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_map_side() {
        assert_eq!(CROP_SIZE >> 4, 7);
    }

    #[test]
    fn test_crop_region_is_enlarged_and_clamped() {
        let face = BoundingBox::new(100.0, 100.0, 50.0, 50.0);
        let region = Landmarks68::crop_region(&face, 640, 480);
        assert!((region.width - 60.0).abs() <= 1.0);
        assert!((region.height - 60.0).abs() <= 1.0);

        let edge = BoundingBox::new(0.0, 0.0, 50.0, 50.0);
        let region = Landmarks68::crop_region(&edge, 640, 480);
        assert!(region.x >= 0.0 && region.y >= 0.0);
        assert!(region.width <= 55.0);
    }
}
