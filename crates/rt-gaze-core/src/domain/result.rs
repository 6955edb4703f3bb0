//! Inference result types.

use serde::{Deserialize, Serialize};

use super::{BoundingBox, GazeAngles, HeadPose, Subject};

/// Basic image information extracted during loading.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Path to the image file.
    pub path: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Decoded image data.
    pub image: image::DynamicImage,
}

impl ImageInfo {
    /// Wraps a decoded image, taking the dimensions from the image itself.
    #[must_use]
    pub fn new(path: impl Into<String>, image: image::DynamicImage) -> Self {
        Self {
            path: path.into(),
            width: image.width(),
            height: image.height(),
            image,
        }
    }
}

/// Image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageDimensions {
    /// Creates a dimensions record.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Why a frame produced no estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The detector found no face above the score threshold, or its box
    /// lies outside the frame.
    NoFace,
    /// A face was found but the landmark regressor could not place points.
    NoLandmarks,
    /// Landmarks were found but an eye crop was empty or out of frame.
    NoEyePatches,
    /// The perspective-n-point solve did not converge.
    PoseUnsolved,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoFace => "no face detected",
            Self::NoLandmarks => "landmarks could not be placed",
            Self::NoEyePatches => "eye patch extraction failed",
            Self::PoseUnsolved => "head pose solve failed",
        };
        f.write_str(text)
    }
}

/// A successful estimate for one frame.
#[derive(Debug, Clone)]
pub struct GazeEstimate {
    /// The subject the estimate was computed for.
    pub subject: Subject,
    /// Head pose fed to the network.
    pub head_pose: HeadPose,
    /// Ensemble mean gaze.
    pub gaze: GazeAngles,
    /// Number of ensemble members that contributed.
    pub models: usize,
}

/// Outcome of running the pipeline on one frame.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    /// Gaze was estimated.
    Estimated(Box<GazeEstimate>),
    /// The frame was skipped.
    Skipped(SkipReason),
}

/// Serializable per-image result written by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazeResult {
    /// Path to the analyzed image.
    pub path: String,
    /// Timestamp of analysis (ISO 8601).
    pub timestamp: String,
    /// Image dimensions.
    pub dimensions: ImageDimensions,
    /// Face bounding box.
    pub face: BoundingBox,
    /// Detector confidence.
    pub face_score: f32,
    /// Head pose fed to the network.
    pub head_pose: HeadPose,
    /// Estimated gaze.
    pub gaze: GazeAngles,
    /// Number of checkpoints in the ensemble.
    pub models: usize,
    /// Path of the rendered eye-patch visualization, if written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<String>,
}

impl GazeResult {
    /// Builds the record for an estimated frame.
    #[must_use]
    pub fn from_estimate(info: &ImageInfo, estimate: &GazeEstimate, timestamp: String) -> Self {
        Self {
            path: info.path.clone(),
            timestamp,
            dimensions: ImageDimensions::new(info.width, info.height),
            face: estimate.subject.face_bbox,
            face_score: estimate.subject.score,
            head_pose: estimate.head_pose,
            gaze: estimate.gaze,
            models: estimate.models,
            visualization: None,
        }
    }
}
