//! Training lifecycle: data loading, augmentation, losses, metrics, folds
//! and the epoch loop.

mod augment;
mod batch;
mod checkpoint;
mod folds;
mod lifecycle;
mod loss;
mod metrics;
mod module;

pub use augment::{AugmentConfig, Augmenter};
pub use batch::{Batch, BatchLoader, LoaderConfig};
pub use checkpoint::{checkpoint_path, fold_dir, EpochRecord, MetricsLog, TestRecord, METRICS_FILE};
pub use folds::{folds, single_split, three_fold, Fold, NUM_SUBJECTS, THREE_FOLD};
pub use lifecycle::{
    FitReport, TestSummary, TrainStep, Trainable, Trainer, TrainerConfig, ValidationStep,
    ValidationSummary,
};
pub use loss::{mse_sum, pinball_sum, LossKind, PINBALL_Q};
pub use metrics::{batch_angular_error, mean_std};
pub use module::{
    run, validate_input_size, FoldReport, GazeTrainingModule, HParams, RunConfig, RunReport,
    DEFAULT_BATCH_SIZE, DEFAULT_INPUT_SIZE, DEFAULT_IO_WORKERS, DEFAULT_LEARNING_RATE,
    DEFAULT_MAX_EPOCHS, MAX_INPUT_SIZE,
};
