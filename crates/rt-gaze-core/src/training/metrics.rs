//! Angular accuracy metrics.

use candle_core::{Result, Tensor, D};

use crate::domain::{angular_error_deg, GazeAngles};

/// Mean angular error in degrees between `output` and `target`.
///
/// Only the first two output columns are read, so pinball outputs can be
/// passed directly.
///
/// # Errors
///
/// Returns an error if the tensors cannot be read back.
#[allow(clippy::cast_precision_loss)]
pub fn batch_angular_error(output: &Tensor, target: &Tensor) -> Result<f32> {
    let pred = output.narrow(D::Minus1, 0, 2)?.to_vec2::<f32>()?;
    let truth = target.to_vec2::<f32>()?;
    if pred.is_empty() {
        return Ok(0.0);
    }
    let total: f32 = pred
        .iter()
        .zip(&truth)
        .map(|(p, t)| angular_error_deg(GazeAngles::new(p[0], p[1]), GazeAngles::new(t[0], t[1])))
        .sum();
    Ok(total / pred.len() as f32)
}

/// Mean and population standard deviation; `(0, 0)` for an empty series.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_batch_angular_error_ignores_spread_column() {
        let yaw = 10_f32.to_radians();
        let out = Tensor::from_slice(&[0.0_f32, yaw, 5.0, 0.0, 0.0, -3.0], (2, 3), &Device::Cpu)
            .unwrap_or_else(|e| panic!("{e}"));
        let target = Tensor::zeros((2, 2), candle_core::DType::F32, &Device::Cpu)
            .unwrap_or_else(|e| panic!("{e}"));
        let err = batch_angular_error(&out, &target).unwrap_or_else(|e| panic!("{e}"));
        assert!((err - 5.0).abs() < 1e-3, "{err}");
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-6);
        assert!((std - 2.0).abs() < 1e-6);
        assert_eq!(mean_std(&[]), (0.0, 0.0));
    }
}
