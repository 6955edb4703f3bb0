//! Convolutional feature extractors shared by both eye branches.
//!
//! Weight names follow the torchvision layouts (`features.N` for VGG-16 and
//! MobileNetV2, `conv1`/`bn1`/`layerL.B` for ResNets) so converted ImageNet
//! weights can seed training. Every extractor ends in global average
//! pooling and returns `(N, feature_dim)`, which makes the input resolution
//! free as long as it is at least 32 px.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{
    batch_norm, conv2d, conv2d_no_bias, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Module,
    ModuleT, VarBuilder,
};
use serde::{Deserialize, Serialize};

/// Backbone architecture of a gaze network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    /// VGG-16 convolutional features.
    #[default]
    Vgg,
    /// MobileNetV2.
    #[serde(rename = "mobilenet")]
    MobileNet,
    /// ResNet-18.
    #[serde(rename = "resnet18")]
    ResNet18,
    /// ResNet-50.
    #[serde(rename = "resnet50")]
    ResNet50,
}

impl Backbone {
    /// All variants, in registry order.
    pub const ALL: [Self; 4] = [Self::Vgg, Self::MobileNet, Self::ResNet18, Self::ResNet50];

    /// Registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vgg => "vgg",
            Self::MobileNet => "mobilenet",
            Self::ResNet18 => "resnet18",
            Self::ResNet50 => "resnet50",
        }
    }

    /// Width of the pooled feature vector.
    #[must_use]
    pub const fn feature_dim(self) -> usize {
        match self {
            Self::Vgg | Self::ResNet18 => 512,
            Self::MobileNet => 1280,
            Self::ResNet50 => 2048,
        }
    }

    /// Builds the extractor with weights under `vb`.
    ///
    /// # Errors
    ///
    /// Returns an error if a weight is missing or has the wrong shape.
    #[allow(clippy::needless_pass_by_value)]
    pub fn build(self, vb: VarBuilder) -> Result<BackboneNet> {
        Ok(match self {
            Self::Vgg => BackboneNet::Vgg(Vgg16::new(&vb)?),
            Self::MobileNet => BackboneNet::MobileNet(MobileNetV2::new(&vb)?),
            Self::ResNet18 => BackboneNet::ResNet(ResNet::new(BlockKind::Basic, [2, 2, 2, 2], &vb)?),
            Self::ResNet50 => {
                BackboneNet::ResNet(ResNet::new(BlockKind::Bottleneck, [3, 4, 6, 3], &vb)?)
            }
        })
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backbone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.name() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown model base '{s}' (expected one of: vgg, mobilenet, resnet18, resnet50)"
                )
            })
    }
}

/// A built feature extractor.
pub enum BackboneNet {
    /// VGG-16 features.
    Vgg(Vgg16),
    /// MobileNetV2 features.
    MobileNet(MobileNetV2),
    /// ResNet-18 or ResNet-50.
    ResNet(ResNet),
}

impl ModuleT for BackboneNet {
    fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let features = match self {
            Self::Vgg(net) => net.forward_t(x, train)?,
            Self::MobileNet(net) => net.forward_t(x, train)?,
            Self::ResNet(net) => net.forward_t(x, train)?,
        };
        features.mean((2, 3))
    }
}

fn bn(channels: usize, vb: VarBuilder) -> candle_core::Result<BatchNorm> {
    batch_norm(channels, BatchNormConfig::default(), vb)
}

/// Convolution followed by batch norm, no activation.
struct ConvBn {
    conv: Conv2d,
    bn: BatchNorm,
}

impl ConvBn {
    #[allow(clippy::too_many_arguments)]
    fn new(
        in_c: usize,
        out_c: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        conv_vb: VarBuilder,
        bn_vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let config = Conv2dConfig {
            padding: kernel / 2,
            stride,
            groups,
            ..Conv2dConfig::default()
        };
        Ok(Self {
            conv: conv2d_no_bias(in_c, out_c, kernel, config, conv_vb)?,
            bn: bn(out_c, bn_vb)?,
        })
    }
}

impl ModuleT for ConvBn {
    fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        self.bn.forward_t(&self.conv.forward(x)?, train)
    }
}

fn relu6(x: &Tensor) -> candle_core::Result<Tensor> {
    x.clamp(0f32, 6f32)
}

// VGG-16

/// Output channels of the VGG-16 convolutions; `0` marks a max pool.
const VGG16_LAYOUT: [usize; 18] = [
    64, 64, 0, 128, 128, 0, 256, 256, 256, 0, 512, 512, 512, 0, 512, 512, 512, 0,
];

enum VggLayer {
    Conv(Conv2d),
    Pool,
}

/// VGG-16 convolutional trunk.
pub struct Vgg16 {
    layers: Vec<VggLayer>,
}

impl Vgg16 {
    fn new(vb: &VarBuilder) -> Result<Self> {
        let vb = vb.pp("features");
        let config = Conv2dConfig {
            padding: 1,
            ..Conv2dConfig::default()
        };
        let mut layers = Vec::with_capacity(VGG16_LAYOUT.len());
        let mut in_c = 3;
        // torchvision numbering: conv, relu, ..., pool
        let mut index = 0;
        for &out_c in &VGG16_LAYOUT {
            if out_c == 0 {
                layers.push(VggLayer::Pool);
                index += 1;
            } else {
                layers.push(VggLayer::Conv(conv2d(in_c, out_c, 3, config, vb.pp(index))?));
                in_c = out_c;
                index += 2;
            }
        }
        Ok(Self { layers })
    }
}

impl ModuleT for Vgg16 {
    fn forward_t(&self, x: &Tensor, _train: bool) -> candle_core::Result<Tensor> {
        let mut h = x.clone();
        for layer in &self.layers {
            h = match layer {
                VggLayer::Conv(conv) => conv.forward(&h)?.relu()?,
                VggLayer::Pool => h.max_pool2d(2)?,
            };
        }
        Ok(h)
    }
}

// MobileNetV2

/// `(expansion, out_channels, repeats, first_stride)` per stage.
const MOBILENET_V2_STAGES: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

struct InvertedResidual {
    expand: Option<ConvBn>,
    depthwise: ConvBn,
    project: ConvBn,
    residual: bool,
}

impl InvertedResidual {
    fn new(
        in_c: usize,
        out_c: usize,
        stride: usize,
        expansion: usize,
        vb: &VarBuilder,
    ) -> candle_core::Result<Self> {
        let vb = vb.pp("conv");
        let hidden = in_c * expansion;
        let (expand, offset) = if expansion == 1 {
            (None, 0)
        } else {
            let e = ConvBn::new(in_c, hidden, 1, 1, 1, vb.pp("0").pp("0"), vb.pp("0").pp("1"))?;
            (Some(e), 1)
        };
        let dw_vb = vb.pp(offset);
        let depthwise = ConvBn::new(hidden, hidden, 3, stride, hidden, dw_vb.pp("0"), dw_vb.pp("1"))?;
        let project = ConvBn::new(hidden, out_c, 1, 1, 1, vb.pp(offset + 1), vb.pp(offset + 2))?;
        Ok(Self {
            expand,
            depthwise,
            project,
            residual: stride == 1 && in_c == out_c,
        })
    }
}

impl ModuleT for InvertedResidual {
    fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let h = match &self.expand {
            Some(expand) => relu6(&expand.forward_t(x, train)?)?,
            None => x.clone(),
        };
        let h = relu6(&self.depthwise.forward_t(&h, train)?)?;
        let h = self.project.forward_t(&h, train)?;
        if self.residual {
            h + x
        } else {
            Ok(h)
        }
    }
}

/// MobileNetV2 feature trunk.
pub struct MobileNetV2 {
    stem: ConvBn,
    blocks: Vec<InvertedResidual>,
    head: ConvBn,
}

impl MobileNetV2 {
    fn new(vb: &VarBuilder) -> Result<Self> {
        let vb = vb.pp("features");
        let stem = ConvBn::new(3, 32, 3, 2, 1, vb.pp("0").pp("0"), vb.pp("0").pp("1"))?;

        let mut blocks = Vec::new();
        let mut in_c = 32;
        let mut index = 1;
        for &(expansion, out_c, repeats, stride) in &MOBILENET_V2_STAGES {
            for r in 0..repeats {
                let s = if r == 0 { stride } else { 1 };
                blocks.push(InvertedResidual::new(in_c, out_c, s, expansion, &vb.pp(index))?);
                in_c = out_c;
                index += 1;
            }
        }

        let head_vb = vb.pp(index);
        let head = ConvBn::new(in_c, 1280, 1, 1, 1, head_vb.pp("0"), head_vb.pp("1"))?;
        Ok(Self { stem, blocks, head })
    }
}

impl ModuleT for MobileNetV2 {
    fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut h = relu6(&self.stem.forward_t(x, train)?)?;
        for block in &self.blocks {
            h = block.forward_t(&h, train)?;
        }
        relu6(&self.head.forward_t(&h, train)?)
    }
}

// ResNet

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Basic,
    Bottleneck,
}

impl BlockKind {
    const fn expansion(self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Bottleneck => 4,
        }
    }
}

/// Residual block; the last stage has no activation before the skip sum.
struct ResidualBlock {
    stages: Vec<ConvBn>,
    downsample: Option<ConvBn>,
}

impl ResidualBlock {
    fn new(
        kind: BlockKind,
        in_c: usize,
        planes: usize,
        stride: usize,
        vb: &VarBuilder,
    ) -> candle_core::Result<Self> {
        let out_c = planes * kind.expansion();
        // (in, out, kernel, stride)
        let shapes: Vec<(usize, usize, usize, usize)> = match kind {
            BlockKind::Basic => vec![(in_c, planes, 3, stride), (planes, planes, 3, 1)],
            BlockKind::Bottleneck => vec![
                (in_c, planes, 1, 1),
                (planes, planes, 3, stride),
                (planes, out_c, 1, 1),
            ],
        };
        let stages = shapes
            .into_iter()
            .enumerate()
            .map(|(i, (ci, co, k, s))| {
                let n = i + 1;
                ConvBn::new(ci, co, k, s, 1, vb.pp(format!("conv{n}")), vb.pp(format!("bn{n}")))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let downsample = if stride != 1 || in_c != out_c {
            let ds = vb.pp("downsample");
            Some(ConvBn::new(in_c, out_c, 1, stride, 1, ds.pp("0"), ds.pp("1"))?)
        } else {
            None
        };
        Ok(Self { stages, downsample })
    }
}

impl ModuleT for ResidualBlock {
    fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut h = x.clone();
        let last = self.stages.len() - 1;
        for (i, stage) in self.stages.iter().enumerate() {
            h = stage.forward_t(&h, train)?;
            if i < last {
                h = h.relu()?;
            }
        }
        let identity = match &self.downsample {
            Some(ds) => ds.forward_t(x, train)?,
            None => x.clone(),
        };
        (h + identity)?.relu()
    }
}

/// ResNet trunk (18 or 50 layers).
pub struct ResNet {
    conv1: Conv2d,
    bn1: BatchNorm,
    blocks: Vec<ResidualBlock>,
}

impl ResNet {
    fn new(kind: BlockKind, depths: [usize; 4], vb: &VarBuilder) -> Result<Self> {
        let conv1 = conv2d_no_bias(
            3,
            64,
            7,
            Conv2dConfig {
                padding: 3,
                stride: 2,
                ..Conv2dConfig::default()
            },
            vb.pp("conv1"),
        )?;
        let bn1 = bn(64, vb.pp("bn1"))?;

        let mut blocks = Vec::new();
        let mut in_c = 64;
        for (layer, (&depth, planes)) in depths.iter().zip([64, 128, 256, 512]).enumerate() {
            let layer_vb = vb.pp(format!("layer{}", layer + 1));
            for b in 0..depth {
                let stride = if b == 0 && layer > 0 { 2 } else { 1 };
                blocks.push(ResidualBlock::new(kind, in_c, planes, stride, &layer_vb.pp(b))?);
                in_c = planes * kind.expansion();
            }
        }
        Ok(Self { conv1, bn1, blocks })
    }
}

impl ModuleT for ResNet {
    fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let h = self.bn1.forward_t(&self.conv1.forward(x)?, train)?.relu()?;
        // Zero padding is safe after ReLU.
        let mut h = h
            .pad_with_zeros(2, 1, 1)?
            .pad_with_zeros(3, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;
        for block in &self.blocks {
            h = block.forward_t(&h, train)?;
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn pooled_width(backbone: Backbone) -> usize {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = backbone.build(vb).unwrap_or_else(|e| panic!("{e}"));
        let x = Tensor::zeros((2, 3, 32, 32), DType::F32, &Device::Cpu)
            .unwrap_or_else(|e| panic!("{e}"));
        let y = net.forward_t(&x, false).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(y.dim(0).unwrap_or_default(), 2);
        y.dim(1).unwrap_or_default()
    }

    #[test]
    fn test_backbone_names_round_trip() {
        for b in Backbone::ALL {
            assert_eq!(b.name().parse::<Backbone>().ok(), Some(b));
        }
        assert!("alexnet".parse::<Backbone>().is_err());
    }

    #[test]
    fn test_vgg_output_width() {
        assert_eq!(pooled_width(Backbone::Vgg), Backbone::Vgg.feature_dim());
    }

    #[test]
    fn test_mobilenet_output_width() {
        assert_eq!(pooled_width(Backbone::MobileNet), Backbone::MobileNet.feature_dim());
    }

    #[test]
    fn test_resnet18_output_width() {
        assert_eq!(pooled_width(Backbone::ResNet18), Backbone::ResNet18.feature_dim());
    }

    #[test]
    fn test_resnet50_output_width() {
        assert_eq!(pooled_width(Backbone::ResNet50), Backbone::ResNet50.feature_dim());
    }
}
