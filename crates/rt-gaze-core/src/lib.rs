//! rt-gaze core - domain logic for appearance-based gaze estimation.
//!
//! This crate contains the domain types, port traits, the head-pose solver,
//! eye-patch handling, the gaze networks and the training lifecycle shared by
//! the `rt-gaze` command line tool.

pub mod domain;
pub mod inference;
pub mod pipeline;
pub mod ports;
pub mod pose;
pub mod training;
pub mod vision;

pub use domain::{
    BoundingBox, EyePatch, FrameOutcome, GazeAngles, GazeEstimate, GazeRegressor, GazeResult,
    GazeSample, HeadPose, ImageDimensions, ImageInfo, Landmarks, SkipReason, Subject,
};
pub use pipeline::{render_estimate, GazePipeline, PipelineConfig};
pub use ports::{
    DatasetProvider, FaceLandmarker, GazeDataset, ImageSource, ProgressEvent, ProgressSink,
    ResultOutput, TrainEvent, TrainSink,
};
