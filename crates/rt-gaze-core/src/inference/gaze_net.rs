//! Two-stream gaze network.
//!
//! Each eye runs through its own backbone and a `Linear -> BatchNorm -> ReLU`
//! projection to 1024 features. The two projections are fused to 512
//! features, the head pose is appended and a small MLP regresses
//! `[theta, phi]` (plus a spread term when trained with pinball loss).

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, BatchNormConfig, Linear, ModuleT, VarBuilder};
use tracing::debug;

use super::backbone::{Backbone, BackboneNet};
use super::loader::load_tensors;
use crate::domain::{GazeAngles, GazeRegressor};

/// Per-eye projection width.
const EYE_FEATURES: usize = 1024;
/// Fused feature width.
const FUSED_FEATURES: usize = 512;
/// Hidden width of the regression head.
const HEAD_HIDDEN: usize = 256;
/// Head-pose input width.
const HEAD_POSE_DIM: usize = 2;

/// Name of the tensor whose length fixes the output width.
const OUTPUT_BIAS: &str = "fc.2.bias";

/// `Linear -> BatchNorm -> ReLU`.
struct FcBnRelu {
    fc: Linear,
    bn: BatchNorm,
}

impl FcBnRelu {
    fn new(in_dim: usize, out_dim: usize, vb: &VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            fc: linear(in_dim, out_dim, vb.pp("0"))?,
            bn: batch_norm(out_dim, BatchNormConfig::default(), vb.pp("1"))?,
        })
    }
}

impl ModuleT for FcBnRelu {
    fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        self.bn.forward_t(&self.fc.forward(x)?, train)?.relu()
    }
}

/// Gaze estimation network.
pub struct GazeNet {
    name: String,
    backbone: Backbone,
    left_features: BackboneNet,
    right_features: BackboneNet,
    xl: FcBnRelu,
    xr: FcBnRelu,
    concat: FcBnRelu,
    fc1: Linear,
    fc2: Linear,
    num_out: usize,
}

impl GazeNet {
    /// Builds a network with `num_out` outputs (2 for MSE, 3 for pinball).
    ///
    /// # Errors
    ///
    /// Returns an error if a weight is missing or has the wrong shape.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(backbone: Backbone, num_out: usize, vb: VarBuilder) -> Result<Self> {
        if num_out < 2 {
            anyhow::bail!("gaze network needs at least 2 outputs, got {num_out}");
        }
        let features = backbone.feature_dim();
        Ok(Self {
            name: backbone.name().to_string(),
            backbone,
            left_features: backbone
                .build(vb.pp("left_features"))
                .context("Failed to build left eye backbone")?,
            right_features: backbone
                .build(vb.pp("right_features"))
                .context("Failed to build right eye backbone")?,
            xl: FcBnRelu::new(features, EYE_FEATURES, &vb.pp("xl"))?,
            xr: FcBnRelu::new(features, EYE_FEATURES, &vb.pp("xr"))?,
            concat: FcBnRelu::new(2 * EYE_FEATURES, FUSED_FEATURES, &vb.pp("concat"))?,
            fc1: linear(FUSED_FEATURES + HEAD_POSE_DIM, HEAD_HIDDEN, vb.pp("fc").pp("0"))?,
            fc2: linear(HEAD_HIDDEN, num_out, vb.pp("fc").pp("2"))?,
            num_out,
        })
    }

    /// Loads a checkpoint; the output width is taken from the stored head.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not match the
    /// requested backbone.
    pub fn load(path: impl AsRef<Path>, backbone: Backbone, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let tensors = load_tensors(path, device)?;
        let num_out = tensors
            .get(OUTPUT_BIAS)
            .with_context(|| format!("Checkpoint {} has no '{OUTPUT_BIAS}'", path.display()))?
            .dim(0)?;
        debug!(
            "Loading {backbone} gaze network with {num_out} outputs from {}",
            path.display()
        );

        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let mut net = Self::new(backbone, num_out, vb)
            .with_context(|| format!("Checkpoint {} does not match a {backbone} network", path.display()))?;
        if let Some(stem) = path.file_stem() {
            net.name = stem.to_string_lossy().into_owned();
        }
        Ok(net)
    }

    /// Backbone architecture.
    #[must_use]
    pub const fn backbone(&self) -> Backbone {
        self.backbone
    }

    /// Output width.
    #[must_use]
    pub const fn num_out(&self) -> usize {
        self.num_out
    }

    /// Runs the network on a batch.
    ///
    /// `left` and `right` are `(N, 3, S, S)`, `head_pose` is `(N, 2)`; the
    /// result is `(N, num_out)`.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatches or device failures.
    pub fn forward_t(
        &self,
        left: &Tensor,
        right: &Tensor,
        head_pose: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let l = self.left_features.forward_t(left, train)?;
        let l = self.xl.forward_t(&l, train)?;
        let r = self.right_features.forward_t(right, train)?;
        let r = self.xr.forward_t(&r, train)?;

        let fused = self.concat.forward_t(&Tensor::cat(&[&l, &r], 1)?, train)?;
        let x = Tensor::cat(&[&fused, head_pose], 1)?;
        let x = self.fc1.forward(&x)?.relu()?;
        self.fc2.forward(&x)
    }
}

impl GazeRegressor for GazeNet {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, left: &Tensor, right: &Tensor, head_pose: &Tensor) -> Result<GazeAngles> {
        let out = self.forward_t(left, right, head_pose, false)?;
        let row = out.get(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        GazeAngles::from_slice(&row).context("gaze network produced fewer than 2 outputs")
    }
}
