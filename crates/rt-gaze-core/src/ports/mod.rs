//! Port definitions for hexagonal architecture.
//!
//! These traits define the boundaries between the domain core and external adapters.

mod dataset;
mod image_source;
mod landmarks;
mod progress;
mod result_output;

pub use dataset::{DatasetProvider, GazeDataset};
pub use image_source::ImageSource;
pub use landmarks::{DetectedFace, FaceLandmarker};
pub use progress::{ProgressEvent, ProgressSink, TrainEvent, TrainSink};
pub use result_output::ResultOutput;
