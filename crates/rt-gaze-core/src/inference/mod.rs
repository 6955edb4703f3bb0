//! Neural network inference using Candle.
//!
//! Provides the gaze network and its backbones, checkpoint ensembles, and the
//! `BlazeFace` + 68-point landmark detector used by the inference pipeline.

mod backbone;
mod blazeface;
mod detector;
mod device;
mod ensemble;
mod gaze_net;
mod landmarks68;
mod loader;

pub use backbone::{Backbone, BackboneNet};
pub use blazeface::{BlazeFace, INPUT_SIZE as DETECTOR_INPUT_SIZE};
pub use detector::{CnnLandmarker, DEFAULT_MIN_FACE_SCORE};
pub use device::{get_device, select_device};
pub use ensemble::GazeEnsemble;
pub use gaze_net::GazeNet;
pub use landmarks68::Landmarks68;
pub use loader::{load_safetensors, load_tensors, LazyModel};
