//! Test support utilities for rt-gaze.
//!
//! Provides mocks of the core ports, synthetic frames, landmarks and
//! datasets, and weight-file builders for exercising the inference and
//! training pipelines without real data.
//!
//! # Example
//!
//! ```
//! use rt_gaze_test_support::{MockImageSource, SyntheticImageBuilder};
//!
//! let frame = SyntheticImageBuilder::uniform(640, 480, [120, 100, 90]);
//! let source = MockImageSource::new(vec![frame]);
//! ```

mod builders;
mod mocks;

pub use builders::{
    frontal_face, synthetic_sample, write_biased_weights, write_frontal_detectors,
    write_gaze_checkpoint, write_synthetic_dataset, write_zero_weights, SyntheticImageBuilder,
};
pub use mocks::{
    InMemoryDataset, InMemoryProvider, MockImageSource, MockLandmarker, MockProgressSink,
    MockRegressor, MockResultOutput, MockTrainSink,
};
