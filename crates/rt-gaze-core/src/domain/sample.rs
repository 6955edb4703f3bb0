//! Training sample type.

use image::RgbImage;

use super::{GazeAngles, HeadPose};

/// One labelled record of the gaze dataset.
#[derive(Debug, Clone)]
pub struct GazeSample {
    /// Subject index the record belongs to.
    pub subject: usize,
    /// Left eye image.
    pub left: RgbImage,
    /// Right eye image.
    pub right: RgbImage,
    /// Head pose label.
    pub head_pose: HeadPose,
    /// Ground-truth gaze.
    pub gaze: GazeAngles,
}
