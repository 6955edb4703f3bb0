//! Progress reporting ports for UI integration.

use crate::domain::{GazeResult, SkipReason};

/// Events emitted while running inference over a batch of images.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Inference started for an image.
    Started {
        /// Path to the image.
        path: String,
        /// Index in the batch (0-based).
        index: usize,
        /// Total images in batch, if known.
        total: Option<usize>,
    },
    /// A gaze estimate was produced.
    Completed {
        /// The result.
        result: GazeResult,
    },
    /// The frame produced no estimate.
    Skipped {
        /// Path to the image.
        path: String,
        /// Reason for skipping.
        reason: String,
    },
    /// All images have been processed.
    Finished {
        /// Frames with an estimate.
        processed: usize,
        /// Frames skipped.
        skipped: usize,
    },
}

impl ProgressEvent {
    /// Builds a `Skipped` event from a pipeline skip reason.
    #[must_use]
    pub fn skipped(path: impl Into<String>, reason: SkipReason) -> Self {
        Self::Skipped {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Port for receiving inference progress events.
pub trait ProgressSink: Send + Sync {
    /// Called when a progress event occurs.
    fn on_event(&self, event: ProgressEvent);
}

/// Events emitted by the training driver.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainEvent {
    /// A fold is about to be fitted.
    FoldStarted {
        /// Fold index.
        fold: usize,
        /// Number of folds in the run.
        folds: usize,
    },
    /// An epoch started.
    EpochStarted {
        /// Fold index.
        fold: usize,
        /// Epoch index (0-based).
        epoch: usize,
        /// Number of training batches in the epoch.
        batches: usize,
    },
    /// A training batch finished.
    BatchFinished {
        /// Batch loss.
        loss: f32,
        /// Mean angular error of the batch in degrees.
        angle: f32,
    },
    /// An epoch finished and its checkpoint was written.
    EpochFinished {
        /// Fold index.
        fold: usize,
        /// Epoch index (0-based).
        epoch: usize,
        /// Mean training loss.
        train_loss: f32,
        /// Mean validation loss.
        val_loss: f32,
        /// Mean validation angular error in degrees.
        val_angle: f32,
        /// Path of the checkpoint.
        checkpoint: String,
    },
    /// The held-out test pass finished.
    TestFinished {
        /// Fold index.
        fold: usize,
        /// Mean angular error in degrees.
        mean: f32,
        /// Standard deviation of the per-batch angular error.
        std: f32,
    },
}

/// Port for receiving training events.
pub trait TrainSink: Send + Sync {
    /// Called when a training event occurs.
    fn on_event(&self, event: TrainEvent);
}
