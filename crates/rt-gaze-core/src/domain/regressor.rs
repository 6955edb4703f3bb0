//! Gaze regressor trait shared by single networks and ensembles.

use candle_core::Tensor;

use super::GazeAngles;

/// Anything that maps eye patches plus head pose to a gaze estimate.
pub trait GazeRegressor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Number of networks behind this regressor.
    fn members(&self) -> usize {
        1
    }

    /// Predicts gaze for a single subject.
    ///
    /// # Arguments
    ///
    /// * `left` - Normalized left eye tensor of shape `(1, 3, S, S)`
    /// * `right` - Normalized right eye tensor of shape `(1, 3, S, S)`
    /// * `head_pose` - Head pose tensor of shape `(1, 2)` in `[phi, theta]` order
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn predict(&self, left: &Tensor, right: &Tensor, head_pose: &Tensor)
        -> anyhow::Result<GazeAngles>;
}
