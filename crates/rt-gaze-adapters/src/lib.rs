//! rt-gaze adapters - external adapters for rt-gaze.
//!
//! This crate provides adapters for:
//! - Filesystem image source
//! - The safetensors gaze dataset store
//! - Model weight downloading and caching

pub mod dataset;
pub mod fs;
pub mod models;

pub use dataset::{
    dataset_info, DatasetSummary, DatasetWriter, SafetensorsDataset, SafetensorsDatasetProvider,
    SubjectSummary,
};
pub use fs::FsImageSource;
pub use models::{model_path, models_dir, set_models_dir};
