//! Core domain types for gaze estimation.

mod angles;
mod face;
mod regressor;
mod result;
mod sample;

pub use angles::{angular_error_deg, limit_yaw, wrap_to_pi, GazeAngles, HeadPose};
pub use face::{BoundingBox, EyePatch, Landmarks, Point2, Subject, NUM_LANDMARKS};
pub use regressor::GazeRegressor;
pub use result::{
    FrameOutcome, GazeEstimate, GazeResult, ImageDimensions, ImageInfo, SkipReason,
};
pub use sample::GazeSample;
