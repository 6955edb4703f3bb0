//! Training lifecycle: the hooks a model exposes and the loop that drives them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Tensor;
use candle_nn::Optimizer;
use tracing::{debug, info};

use super::batch::{Batch, BatchLoader};
use super::checkpoint::{checkpoint_path, fold_dir, EpochRecord, MetricsLog, TestRecord};
use super::metrics::mean_std;
use crate::ports::{TrainEvent, TrainSink};

/// Output of one training step.
pub struct TrainStep {
    /// Scalar loss the optimizer backpropagates.
    pub loss: Tensor,
    /// Mean angular error of the batch in degrees.
    pub angle: f32,
}

/// Output of one validation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationStep {
    /// Batch loss.
    pub loss: f32,
    /// Mean angular error of the batch in degrees.
    pub angle: f32,
}

/// Aggregated validation metrics of one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationSummary {
    /// Mean batch loss.
    pub loss: f32,
    /// Mean batch angular error in degrees.
    pub angle: f32,
}

/// Aggregated test metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestSummary {
    /// Mean of the per-batch angular errors.
    pub mean: f32,
    /// Population standard deviation of the per-batch angular errors.
    pub std: f32,
}

/// A model the [`Trainer`] can fit, validate and test.
pub trait Trainable {
    /// Optimizer returned by [`Trainable::configure_optimizer`].
    type Optimizer: Optimizer;

    /// Forward pass in training mode, returning the loss to minimize.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn training_step(&mut self, batch: &Batch, batch_idx: usize) -> Result<TrainStep>;

    /// Forward pass in evaluation mode on a validation batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn validation_step(&self, batch: &Batch, batch_idx: usize) -> Result<ValidationStep>;

    /// Reduces the validation steps of one epoch.
    fn validation_end(&self, outputs: &[ValidationStep]) -> ValidationSummary {
        let losses: Vec<f32> = outputs.iter().map(|o| o.loss).collect();
        let angles: Vec<f32> = outputs.iter().map(|o| o.angle).collect();
        ValidationSummary {
            loss: mean_std(&losses).0,
            angle: mean_std(&angles).0,
        }
    }

    /// Angular error of one test batch in degrees.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn test_step(&self, batch: &Batch, batch_idx: usize) -> Result<f32>;

    /// Reduces the test steps to mean and standard deviation.
    fn test_end(&self, outputs: &[f32]) -> TestSummary {
        let (mean, std) = mean_std(outputs);
        TestSummary { mean, std }
    }

    /// Creates the optimizer over the trainable variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer cannot be created.
    fn configure_optimizer(&self) -> Result<Self::Optimizer>;

    /// Loader over the training subjects.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset view cannot be opened.
    fn train_loader(&self) -> Result<BatchLoader>;

    /// Loader over the validation subjects.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset view cannot be opened.
    fn val_loader(&self) -> Result<BatchLoader>;

    /// Loader over the held-out subjects, `None` when there are none.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset view cannot be opened.
    fn test_loader(&self) -> Result<Option<BatchLoader>>;

    /// Writes all model variables to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn save_checkpoint(&self, path: &Path) -> Result<()>;
}

/// Settings of the training loop.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Number of epochs to fit.
    pub max_epochs: usize,
    /// Root directory for checkpoints.
    pub save_dir: PathBuf,
}

/// What a fit produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    /// Metrics of every epoch.
    pub epochs: Vec<EpochRecord>,
    /// Test result, if the fold has test subjects.
    pub test: Option<TestRecord>,
}

/// Drives a [`Trainable`] through fit, per-epoch validation and checkpointing,
/// then the optional test pass.
pub struct Trainer<'a> {
    config: TrainerConfig,
    sink: &'a dyn TrainSink,
}

impl<'a> Trainer<'a> {
    /// Creates a trainer reporting to `sink`.
    #[must_use]
    pub fn new(config: TrainerConfig, sink: &'a dyn TrainSink) -> Self {
        Self { config, sink }
    }

    /// Fits `module` for the configured epochs, then tests it.
    ///
    /// Every epoch writes `fold_<k>/ckpt_epoch_<e>.safetensors` and appends
    /// a line to `fold_<k>/metrics.jsonl`; the test result is appended last.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, a step, or writing a checkpoint fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn run<M: Trainable>(&self, module: &mut M, fold: usize) -> Result<FitReport> {
        let dir = fold_dir(&self.config.save_dir, fold);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let mut log = MetricsLog::open(&dir)?;

        let train_loader = module.train_loader()?;
        let val_loader = module.val_loader()?;
        if train_loader.is_empty() {
            anyhow::bail!("fold {fold} has no training records");
        }
        let mut optimizer = module.configure_optimizer()?;
        info!(
            "Fold {fold}: {} training / {} validation records",
            train_loader.num_samples(),
            val_loader.num_samples()
        );

        let mut epochs = Vec::with_capacity(self.config.max_epochs);
        for epoch in 0..self.config.max_epochs {
            self.sink.on_event(TrainEvent::EpochStarted {
                fold,
                epoch,
                batches: train_loader.len(),
            });

            let mut losses = Vec::with_capacity(train_loader.len());
            let mut angles = Vec::with_capacity(train_loader.len());
            for (batch_idx, batch) in train_loader.epoch(epoch).enumerate() {
                let batch = batch?;
                let step = module.training_step(&batch, batch_idx)?;
                optimizer.backward_step(&step.loss)?;
                let loss = step.loss.to_scalar::<f32>()?;
                debug!("epoch {epoch} batch {batch_idx}: loss {loss:.4} angle {:.2}", step.angle);
                self.sink.on_event(TrainEvent::BatchFinished {
                    loss,
                    angle: step.angle,
                });
                losses.push(loss);
                angles.push(step.angle);
            }

            let val = Self::validate(module, &val_loader, epoch)?;
            let checkpoint = checkpoint_path(&dir, epoch);
            module.save_checkpoint(&checkpoint)?;

            let record = EpochRecord {
                fold,
                epoch,
                train_loss: mean_std(&losses).0,
                train_angle: mean_std(&angles).0,
                val_loss: val.loss,
                val_angle: val.angle,
                checkpoint: checkpoint.clone(),
            };
            log.append(&record)?;
            info!(
                "Fold {fold} epoch {epoch}: train_loss {:.4} val_loss {:.4} val_angle {:.2}",
                record.train_loss, record.val_loss, record.val_angle
            );
            self.sink.on_event(TrainEvent::EpochFinished {
                fold,
                epoch,
                train_loss: record.train_loss,
                val_loss: record.val_loss,
                val_angle: record.val_angle,
                checkpoint: checkpoint.display().to_string(),
            });
            epochs.push(record);
        }

        let test = match module.test_loader()? {
            Some(loader) if !loader.is_empty() => {
                let summary = Self::test(module, &loader)?;
                let record = TestRecord {
                    fold,
                    test_angle_mean: summary.mean,
                    test_angle_std: summary.std,
                };
                log.append(&record)?;
                info!(
                    "Fold {fold} test: {:.2} +- {:.2} degrees",
                    summary.mean, summary.std
                );
                self.sink.on_event(TrainEvent::TestFinished {
                    fold,
                    mean: summary.mean,
                    std: summary.std,
                });
                Some(record)
            }
            _ => None,
        };

        Ok(FitReport { epochs, test })
    }

    fn validate<M: Trainable>(
        module: &M,
        loader: &BatchLoader,
        epoch: usize,
    ) -> Result<ValidationSummary> {
        let mut outputs = Vec::with_capacity(loader.len());
        for (batch_idx, batch) in loader.epoch(epoch).enumerate() {
            outputs.push(module.validation_step(&batch?, batch_idx)?);
        }
        Ok(module.validation_end(&outputs))
    }

    fn test<M: Trainable>(module: &M, loader: &BatchLoader) -> Result<TestSummary> {
        let mut outputs = Vec::with_capacity(loader.len());
        for (batch_idx, batch) in loader.epoch(0).enumerate() {
            outputs.push(module.test_step(&batch?, batch_idx)?);
        }
        Ok(module.test_end(&outputs))
    }
}
