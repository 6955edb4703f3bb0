//! `BlazeFace` short-range face detector.
//!
//! Follows the layout of the hollance/BlazeFace-PyTorch weights with batch
//! norm folded into the convolution biases. Input is a 128x128 RGB frame
//! scaled to `[-1, 1]`; the two detection heads cover 896 anchors on 16x16
//! and 8x8 grids.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use candle_core::{Device, Module, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder};
use image::imageops::FilterType;

use crate::domain::BoundingBox;
use crate::ports::DetectedFace;

/// Detector input resolution.
pub const INPUT_SIZE: usize = 128;

const ANCHORS_16: usize = 16 * 16 * 2;
const ANCHORS_8: usize = 8 * 8 * 6;
const NUM_ANCHORS: usize = ANCHORS_16 + ANCHORS_8;

/// IoU above which overlapping detections are suppressed.
const NMS_THRESHOLD: f32 = 0.3;

/// `(in, out, stride)` for the blocks feeding the 16x16 head.
const BACKBONE1: [(usize, usize, usize); 11] = [
    (24, 24, 1),
    (24, 28, 1),
    (28, 32, 2),
    (32, 36, 1),
    (36, 42, 1),
    (42, 48, 2),
    (48, 56, 1),
    (56, 64, 1),
    (64, 72, 1),
    (72, 80, 1),
    (80, 88, 1),
];

/// `(in, out, stride)` for the blocks feeding the 8x8 head.
const BACKBONE2: [(usize, usize, usize); 5] = [
    (88, 96, 2),
    (96, 96, 1),
    (96, 96, 1),
    (96, 96, 1),
    (96, 96, 1),
];

/// Depthwise-separable residual block.
struct BlazeBlock {
    depthwise: Conv2d,
    pointwise: Conv2d,
    channel_pad: usize,
    stride: usize,
}

impl BlazeBlock {
    fn new(in_c: usize, out_c: usize, stride: usize, vb: &VarBuilder) -> Result<Self> {
        let depthwise = conv2d(
            in_c,
            in_c,
            3,
            Conv2dConfig {
                stride,
                padding: if stride == 2 { 0 } else { 1 },
                groups: in_c,
                ..Conv2dConfig::default()
            },
            vb.pp("depthwise"),
        )?;
        let pointwise = conv2d(in_c, out_c, 1, Conv2dConfig::default(), vb.pp("pointwise"))?;
        Ok(Self {
            depthwise,
            pointwise,
            channel_pad: out_c.saturating_sub(in_c),
            stride,
        })
    }
}

impl Module for BlazeBlock {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let (h, residual) = if self.stride == 2 {
            let padded = x.pad_with_zeros(2, 0, 2)?.pad_with_zeros(3, 0, 2)?;
            (padded, x.max_pool2d(2)?)
        } else {
            (x.clone(), x.clone())
        };
        let h = self.depthwise.forward(&h)?.relu()?;
        let h = self.pointwise.forward(&h)?;
        let residual = if self.channel_pad > 0 {
            residual.pad_with_zeros(1, 0, self.channel_pad)?
        } else {
            residual
        };
        (h + residual)?.relu()
    }
}

/// `BlazeFace` detector network.
pub struct BlazeFace {
    conv0: Conv2d,
    backbone1: Vec<BlazeBlock>,
    backbone2: Vec<BlazeBlock>,
    classifier_16: Conv2d,
    regressor_16: Conv2d,
    classifier_8: Conv2d,
    regressor_8: Conv2d,
    anchors: Vec<[f32; 2]>,
    device: Device,
}

impl BlazeFace {
    /// Builds the detector from weights.
    ///
    /// # Errors
    ///
    /// Returns an error if a weight is missing or has the wrong shape.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(vb: VarBuilder) -> Result<Self> {
        let conv0 = conv2d(
            3,
            24,
            5,
            Conv2dConfig {
                stride: 2,
                ..Conv2dConfig::default()
            },
            vb.pp("conv0"),
        )?;

        let backbone1 = BACKBONE1
            .iter()
            .enumerate()
            .map(|(i, &(in_c, out_c, s))| {
                BlazeBlock::new(in_c, out_c, s, &vb.pp(format!("backbone1.{i}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let backbone2 = BACKBONE2
            .iter()
            .enumerate()
            .map(|(i, &(in_c, out_c, s))| {
                BlazeBlock::new(in_c, out_c, s, &vb.pp(format!("backbone2.{i}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let head = |in_c: usize, out_c: usize, name: &str| {
            conv2d(in_c, out_c, 1, Conv2dConfig::default(), vb.pp(name))
        };

        Ok(Self {
            conv0,
            backbone1,
            backbone2,
            classifier_16: head(88, 2, "classifier_16")?,
            regressor_16: head(88, 32, "regressor_16")?,
            classifier_8: head(96, 6, "classifier_8")?,
            regressor_8: head(96, 96, "regressor_8")?,
            anchors: anchor_centres(),
            device: vb.device().clone(),
        })
    }

    /// Converts a frame into a `(1, 3, 128, 128)` tensor in `[-1, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if tensor creation fails.
    pub fn preprocess(&self, image: &image::DynamicImage) -> Result<Tensor> {
        let rgb = image
            .resize_exact(INPUT_SIZE as u32, INPUT_SIZE as u32, FilterType::Triangle)
            .to_rgb8();
        let data: Vec<f32> = rgb
            .as_raw()
            .iter()
            .map(|&v| f32::from(v) / 127.5 - 1.0)
            .collect();
        Tensor::from_vec(data, (1, INPUT_SIZE, INPUT_SIZE, 3), &self.device)?
            .permute((0, 3, 1, 2))?
            .contiguous()
            .context("Failed to preprocess detector input")
    }

    fn forward(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let x = x.pad_with_zeros(2, 1, 2)?.pad_with_zeros(3, 1, 2)?;
        let mut h = self.conv0.forward(&x)?.relu()?;
        for block in &self.backbone1 {
            h = block.forward(&h)?;
        }
        let feature_16 = h.clone();
        for block in &self.backbone2 {
            h = block.forward(&h)?;
        }

        let flat = |t: Tensor, n: usize, k: usize| -> candle_core::Result<Tensor> {
            t.permute((0, 2, 3, 1))?.reshape((1, n, k))
        };
        let c1 = flat(self.classifier_16.forward(&feature_16)?, ANCHORS_16, 1)?;
        let r1 = flat(self.regressor_16.forward(&feature_16)?, ANCHORS_16, 16)?;
        let c2 = flat(self.classifier_8.forward(&h)?, ANCHORS_8, 1)?;
        let r2 = flat(self.regressor_8.forward(&h)?, ANCHORS_8, 16)?;

        Ok((Tensor::cat(&[c1, c2], 1)?, Tensor::cat(&[r1, r2], 1)?))
    }

    /// Detects faces scoring at least `min_score`, most confident first.
    /// Boxes are returned in pixel coordinates of `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    pub fn detect(&self, image: &image::DynamicImage, min_score: f32) -> Result<Vec<DetectedFace>> {
        let input = self.preprocess(image)?;
        let (scores, boxes) = self.forward(&input)?;
        let scores = scores.squeeze(0)?.squeeze(1)?.to_vec1::<f32>()?;
        let boxes = boxes.squeeze(0)?.to_vec2::<f32>()?;

        let (w, h) = (image.width() as f32, image.height() as f32);
        let size = INPUT_SIZE as f32;
        let mut detections = Vec::new();
        for ((logit, raw), anchor) in scores.iter().zip(&boxes).zip(&self.anchors) {
            let score = sigmoid(*logit);
            if score < min_score {
                continue;
            }
            let cx = anchor[0] + raw[0] / size;
            let cy = anchor[1] + raw[1] / size;
            let bw = raw[2] / size;
            let bh = raw[3] / size;
            let bbox = BoundingBox::from_corners(
                (cx - bw / 2.0).clamp(0.0, 1.0) * w,
                (cy - bh / 2.0).clamp(0.0, 1.0) * h,
                (cx + bw / 2.0).clamp(0.0, 1.0) * w,
                (cy + bh / 2.0).clamp(0.0, 1.0) * h,
            );
            detections.push(DetectedFace { bbox, score });
        }
        Ok(non_max_suppression(detections))
    }
}

/// Normalized anchor centres: 2 per cell on 16x16, then 6 per cell on 8x8.
fn anchor_centres() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for (grid, per_cell) in [(16_u8, 2), (8_u8, 6)] {
        let g = f32::from(grid);
        for y in 0..grid {
            for x in 0..grid {
                let centre = [(f32::from(x) + 0.5) / g, (f32::from(y) + 0.5) / g];
                anchors.extend(std::iter::repeat(centre).take(per_cell));
            }
        }
    }
    anchors
}

/// Anchor logit to confidence.
fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

/// Keeps the best detection of every overlapping cluster.
fn non_max_suppression(mut detections: Vec<DetectedFace>) -> Vec<DetectedFace> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<DetectedFace> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) < NMS_THRESHOLD) {
            keep.push(det);
        }
    }
    keep
}
