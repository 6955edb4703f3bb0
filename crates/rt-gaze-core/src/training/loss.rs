//! Training losses.

use std::fmt;
use std::str::FromStr;

use candle_core::{Result, Tensor, D};
use serde::{Deserialize, Serialize};

/// Lower quantile of the pinball loss; the upper one is `1 - PINBALL_Q`.
pub const PINBALL_Q: f64 = 0.1;

/// Loss function selected for training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    /// Squared error, summed over the batch.
    #[default]
    Mse,
    /// Quantile loss at 0.1 and 0.9 around a learned spread, summed.
    Pinball,
}

impl LossKind {
    /// Network output width this loss expects.
    #[must_use]
    pub const fn output_width(self) -> usize {
        match self {
            Self::Mse => 2,
            Self::Pinball => 3,
        }
    }

    /// Registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mse => "mse",
            Self::Pinball => "pinball",
        }
    }

    /// Computes the summed loss of `output` `(N, width)` against `target` `(N, 2)`.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatches.
    pub fn compute(self, output: &Tensor, target: &Tensor) -> Result<Tensor> {
        match self {
            Self::Mse => mse_sum(output, target),
            Self::Pinball => pinball_sum(output, target),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "mse" => Ok(Self::Mse),
            "pinball" => Ok(Self::Pinball),
            other => anyhow::bail!("unknown loss function '{other}' (expected mse or pinball)"),
        }
    }
}

/// Sum of squared differences.
///
/// # Errors
///
/// Returns an error on shape mismatches.
pub fn mse_sum(output: &Tensor, target: &Tensor) -> Result<Tensor> {
    output.sub(target)?.sqr()?.sum_all()
}

/// Summed pinball loss.
///
/// Columns 0..2 of `output` are the angle estimates and column 2 the spread,
/// which is applied to both angles. The 0.1 quantile sits at
/// `estimate - spread` and the 0.9 quantile at `estimate + spread`.
///
/// # Errors
///
/// Returns an error if `output` is narrower than 3 columns or shapes mismatch.
pub fn pinball_sum(output: &Tensor, target: &Tensor) -> Result<Tensor> {
    let estimate = output.narrow(D::Minus1, 0, 2)?;
    let spread = output.narrow(D::Minus1, 2, 1)?.broadcast_as(estimate.shape())?;

    let q10 = target.sub(&estimate.sub(&spread)?)?;
    let q90 = target.sub(&estimate.add(&spread)?)?;

    quantile(&q10, PINBALL_Q)?.add(&quantile(&q90, 1.0 - PINBALL_Q)?)
}

fn quantile(diff: &Tensor, q: f64) -> Result<Tensor> {
    let above = diff.affine(q, 0.0)?;
    let below = diff.affine(q - 1.0, 0.0)?;
    above.maximum(&below)?.sum_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn t(data: &[f32], rows: usize) -> Tensor {
        Tensor::from_slice(data, (rows, data.len() / rows), &Device::Cpu)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    fn scalar(x: &Tensor) -> f32 {
        x.to_scalar::<f32>().unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn test_output_widths() {
        assert_eq!(LossKind::Mse.output_width(), 2);
        assert_eq!(LossKind::Pinball.output_width(), 3);
        assert_eq!("pinball".parse::<LossKind>().ok(), Some(LossKind::Pinball));
        assert!("l1".parse::<LossKind>().is_err());
    }

    #[test]
    fn test_mse_is_summed() {
        let out = t(&[1.0, 2.0, 3.0, 4.0], 2);
        let target = t(&[0.0, 2.0, 1.0, 4.0], 2);
        let loss = LossKind::Mse.compute(&out, &target).unwrap_or_else(|e| panic!("{e}"));
        assert!((scalar(&loss) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_pinball_zero_spread_exact_hit() {
        let out = t(&[0.5, -0.5, 0.0], 1);
        let target = t(&[0.5, -0.5], 1);
        let loss = LossKind::Pinball.compute(&out, &target).unwrap_or_else(|e| panic!("{e}"));
        assert!(scalar(&loss).abs() < 1e-6);
    }

    #[test]
    fn test_pinball_asymmetry() {
        // Estimate 0, spread 0, target 1: both quantiles under-predict by 1.
        // q = 0.1 contributes 0.1, q = 0.9 contributes 0.9, per angle.
        let out = t(&[0.0, 0.0, 0.0], 1);
        let target = t(&[1.0, 1.0], 1);
        let loss = pinball_sum(&out, &target).unwrap_or_else(|e| panic!("{e}"));
        assert!((scalar(&loss) - 2.0).abs() < 1e-5);

        // Target -1: over-prediction weights flip but still sum to 1 per angle.
        let target = t(&[-1.0, -1.0], 1);
        let loss = pinball_sum(&out, &target).unwrap_or_else(|e| panic!("{e}"));
        assert!((scalar(&loss) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_pinball_spread_covers_target() {
        // Target inside [estimate - spread, estimate + spread] costs less than
        // the same target with no spread.
        let target = t(&[0.2, 0.2], 1);
        let tight = pinball_sum(&t(&[0.0, 0.0, 0.0], 1), &target).unwrap_or_else(|e| panic!("{e}"));
        let wide = pinball_sum(&t(&[0.0, 0.0, 0.2], 1), &target).unwrap_or_else(|e| panic!("{e}"));
        assert!(scalar(&wide) < scalar(&tight));
    }
}
