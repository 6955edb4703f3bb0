//! The gaze network bound to its data, loss and optimizer, plus the driver
//! that trains one module per fold.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::batch::Batch;
use super::folds::{folds, Fold};
use super::lifecycle::{
    FitReport, TestSummary, TrainStep, Trainable, Trainer, TrainerConfig, ValidationStep,
};
use super::metrics::{batch_angular_error, mean_std};
use super::{AugmentConfig, Augmenter, BatchLoader, LoaderConfig, LossKind};
use crate::inference::{load_tensors, Backbone, GazeNet};
use crate::ports::{DatasetProvider, TrainEvent, TrainSink};

/// Default learning rate.
pub const DEFAULT_LEARNING_RATE: f64 = 0.000_325;
/// Default batch size.
pub const DEFAULT_BATCH_SIZE: usize = 128;
/// Default number of loader threads.
pub const DEFAULT_IO_WORKERS: usize = 8;
/// Default network input resolution.
pub const DEFAULT_INPUT_SIZE: u32 = 224;
/// Largest accepted eye patch resolution.
pub const MAX_INPUT_SIZE: u32 = 4096;
/// Default number of epochs.
pub const DEFAULT_MAX_EPOCHS: usize = 5;

/// Adam first-moment decay.
const BETA1: f64 = 0.9;
/// Adam second-moment decay.
const BETA2: f64 = 0.95;

/// File the run hyperparameters are written to.
const HPARAMS_FILE: &str = "hparams.json";

/// Checks that `size` is a usable eye patch resolution.
///
/// # Errors
///
/// Returns an error unless `size` is in `1..=MAX_INPUT_SIZE`.
pub fn validate_input_size(size: u32) -> Result<()> {
    if size == 0 || size > MAX_INPUT_SIZE {
        anyhow::bail!("input size must be in 1..={MAX_INPUT_SIZE}, got {size}");
    }
    Ok(())
}

/// Hyperparameters of one training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HParams {
    /// Apply the augmentation chain to training batches.
    pub augment: bool,
    /// Loss function; also fixes the output width.
    pub loss_fn: LossKind,
    /// Samples per batch.
    pub batch_size: usize,
    /// Adam learning rate.
    pub learning_rate: f64,
    /// Backbone architecture.
    pub model_base: Backbone,
    /// Loader threads.
    pub num_io_workers: usize,
    /// Eye patch resolution fed to the network.
    pub input_size: u32,
    /// Seed for shuffling and augmentation.
    pub seed: u64,
    /// Safetensors file with ImageNet backbone weights to start from.
    pub pretrained_backbone: Option<PathBuf>,
}

impl Default for HParams {
    fn default() -> Self {
        Self {
            augment: false,
            loss_fn: LossKind::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            model_base: Backbone::default(),
            num_io_workers: DEFAULT_IO_WORKERS,
            input_size: DEFAULT_INPUT_SIZE,
            seed: 0,
            pretrained_backbone: None,
        }
    }
}

/// A freshly initialised [`GazeNet`] training on one fold.
pub struct GazeTrainingModule {
    hparams: HParams,
    fold: Fold,
    provider: Arc<dyn DatasetProvider>,
    varmap: VarMap,
    model: GazeNet,
    device: Device,
}

impl GazeTrainingModule {
    /// Builds the network for `fold`.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be built or the pretrained
    /// backbone weights cannot be applied.
    pub fn new(
        hparams: HParams,
        fold: Fold,
        provider: Arc<dyn DatasetProvider>,
        device: Device,
    ) -> Result<Self> {
        if !fold.is_disjoint() {
            anyhow::bail!("fold subject lists overlap: {fold:?}");
        }
        validate_input_size(hparams.input_size)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = GazeNet::new(hparams.model_base, hparams.loss_fn.output_width(), vb)?;

        let module = Self {
            hparams,
            fold,
            provider,
            varmap,
            model,
            device,
        };
        if let Some(path) = &module.hparams.pretrained_backbone {
            module.load_pretrained_backbone(path)?;
        }
        Ok(module)
    }

    /// Hyperparameters of this module.
    #[must_use]
    pub const fn hparams(&self) -> &HParams {
        &self.hparams
    }

    /// Subject lists of this module.
    #[must_use]
    pub const fn fold(&self) -> &Fold {
        &self.fold
    }

    /// The network being trained.
    #[must_use]
    pub const fn model(&self) -> &GazeNet {
        &self.model
    }

    /// Copies backbone weights into both eye branches.
    ///
    /// Tensor names in `path` are the backbone's own (`features.0.weight`,
    /// `layer1.0.conv1.weight`, ...); names the backbone does not use are
    /// ignored.
    fn load_pretrained_backbone(&self, path: &Path) -> Result<()> {
        let pretrained = load_tensors(path, &self.device)?;
        let vars = self
            .varmap
            .data()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut copied = 0;
        for (name, var) in vars.iter() {
            let Some(key) = name
                .strip_prefix("left_features.")
                .or_else(|| name.strip_prefix("right_features."))
            else {
                continue;
            };
            if let Some(tensor) = pretrained.get(key) {
                var.set(tensor)
                    .with_context(|| format!("Pretrained tensor '{key}' does not fit '{name}'"))?;
                copied += 1;
            }
        }
        if copied == 0 {
            anyhow::bail!(
                "{} holds no {} backbone weights",
                path.display(),
                self.hparams.model_base
            );
        }
        info!("Seeded {copied} backbone tensors from {}", path.display());
        Ok(())
    }

    fn loader(&self, subjects: &[usize], train: bool) -> Result<BatchLoader> {
        let dataset = self
            .provider
            .open(subjects)
            .with_context(|| format!("Failed to open dataset for subjects {subjects:?}"))?;
        let config = LoaderConfig {
            batch_size: self.hparams.batch_size,
            input_size: self.hparams.input_size,
            shuffle: train,
            num_workers: self.hparams.num_io_workers,
            seed: self.hparams.seed,
        };
        let augmenter = (train && self.hparams.augment)
            .then(|| Augmenter::new(AugmentConfig::new(self.hparams.input_size)));
        BatchLoader::new(dataset, config, augmenter, self.device.clone())
    }
}

impl Trainable for GazeTrainingModule {
    type Optimizer = AdamW;

    fn training_step(&mut self, batch: &Batch, _batch_idx: usize) -> Result<TrainStep> {
        let out = self
            .model
            .forward_t(&batch.left, &batch.right, &batch.head_pose, true)?;
        let loss = self.hparams.loss_fn.compute(&out, &batch.gaze)?;
        let angle = batch_angular_error(&out, &batch.gaze)?;
        Ok(TrainStep { loss, angle })
    }

    fn validation_step(&self, batch: &Batch, _batch_idx: usize) -> Result<ValidationStep> {
        let out = self
            .model
            .forward_t(&batch.left, &batch.right, &batch.head_pose, false)?;
        let loss = self
            .hparams
            .loss_fn
            .compute(&out, &batch.gaze)?
            .to_scalar::<f32>()?;
        let angle = batch_angular_error(&out, &batch.gaze)?;
        Ok(ValidationStep { loss, angle })
    }

    fn test_step(&self, batch: &Batch, _batch_idx: usize) -> Result<f32> {
        let out = self
            .model
            .forward_t(&batch.left, &batch.right, &batch.head_pose, false)?;
        Ok(batch_angular_error(&out, &batch.gaze)?)
    }

    fn test_end(&self, outputs: &[f32]) -> TestSummary {
        let (mean, std) = mean_std(outputs);
        info!(
            "Test subjects {:?}: {mean:.2} +- {std:.2} degrees over {} batches",
            self.fold.test,
            outputs.len()
        );
        TestSummary { mean, std }
    }

    fn configure_optimizer(&self) -> Result<AdamW> {
        let params = ParamsAdamW {
            lr: self.hparams.learning_rate,
            beta1: BETA1,
            beta2: BETA2,
            eps: 1e-8,
            weight_decay: 0.0,
        };
        AdamW::new(self.varmap.all_vars(), params).context("Failed to create optimizer")
    }

    fn train_loader(&self) -> Result<BatchLoader> {
        self.loader(&self.fold.train, true)
    }

    fn val_loader(&self) -> Result<BatchLoader> {
        self.loader(&self.fold.validate, false)
    }

    fn test_loader(&self) -> Result<Option<BatchLoader>> {
        if self.fold.test.is_empty() {
            return Ok(None);
        }
        self.loader(&self.fold.test, false).map(Some)
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        self.varmap
            .save(path)
            .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;
        debug!("Wrote checkpoint {}", path.display());
        Ok(())
    }
}

/// Settings of a full training run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Hyperparameters shared by every fold.
    pub hparams: HParams,
    /// Epochs per fold.
    pub max_epochs: usize,
    /// Root directory for checkpoints and metrics.
    pub save_dir: PathBuf,
    /// Use the three-fold partition instead of the single split.
    pub k_fold_validation: bool,
    /// Device to train on.
    pub device: Device,
}

/// Outcome of one fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldReport {
    /// Fold index.
    pub fold: usize,
    /// Subject lists of the fold.
    pub subjects: Fold,
    /// Epoch and test metrics.
    pub fit: FitReport,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Per-fold results, in fold order.
    pub folds: Vec<FoldReport>,
}

impl RunReport {
    /// Mean and standard deviation of the per-fold test means, if any fold
    /// was tested.
    #[must_use]
    pub fn test_summary(&self) -> Option<TestSummary> {
        let means: Vec<f32> = self
            .folds
            .iter()
            .filter_map(|f| f.fit.test.map(|t| t.test_angle_mean))
            .collect();
        if means.is_empty() {
            return None;
        }
        let (mean, std) = mean_std(&means);
        Some(TestSummary { mean, std })
    }
}

/// Trains a fresh module on every fold of the selected partition.
///
/// # Errors
///
/// Returns an error if the input size is out of range or a fold cannot be
/// built, fitted or checkpointed.
pub fn run(
    config: &RunConfig,
    provider: &Arc<dyn DatasetProvider>,
    sink: &dyn TrainSink,
) -> Result<RunReport> {
    if config.max_epochs == 0 {
        anyhow::bail!("max_epochs must be greater than 0");
    }
    validate_input_size(config.hparams.input_size)?;
    fs::create_dir_all(&config.save_dir)
        .with_context(|| format!("Failed to create {}", config.save_dir.display()))?;
    let hparams_path = config.save_dir.join(HPARAMS_FILE);
    let hparams_json = serde_json::to_string_pretty(&config.hparams)?;
    fs::write(&hparams_path, hparams_json)
        .with_context(|| format!("Failed to write {}", hparams_path.display()))?;

    let partition = folds(config.k_fold_validation);
    if !config.k_fold_validation {
        warn!("Single split has no held-out subjects; the test pass is skipped");
    }

    let trainer = Trainer::new(
        TrainerConfig {
            max_epochs: config.max_epochs,
            save_dir: config.save_dir.clone(),
        },
        sink,
    );

    let mut reports = Vec::with_capacity(partition.len());
    for (index, fold) in partition.iter().enumerate() {
        sink.on_event(TrainEvent::FoldStarted {
            fold: index,
            folds: partition.len(),
        });
        info!(
            "Fold {index}: train {:?} validate {:?} test {:?}",
            fold.train, fold.validate, fold.test
        );
        let mut module = GazeTrainingModule::new(
            config.hparams.clone(),
            fold.clone(),
            Arc::clone(provider),
            config.device.clone(),
        )?;
        let fit = trainer
            .run(&mut module, index)
            .with_context(|| format!("Fold {index} failed"))?;
        reports.push(FoldReport {
            fold: index,
            subjects: fold.clone(),
            fit,
        });
    }

    Ok(RunReport { folds: reports })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::domain::{GazeAngles, GazeSample, HeadPose};
    use crate::ports::GazeDataset;
    use crate::training::{three_fold, METRICS_FILE};

    const PER_SUBJECT: usize = 2;

    struct View {
        subjects: Vec<usize>,
    }

    impl GazeDataset for View {
        fn len(&self) -> usize {
            self.subjects.len() * PER_SUBJECT
        }

        fn subjects(&self) -> &[usize] {
            &self.subjects
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        fn get(&self, index: usize) -> Result<GazeSample> {
            let subject = self.subjects[index / PER_SUBJECT];
            let shade = (subject * 10) as u8;
            Ok(GazeSample {
                subject,
                left: RgbImage::from_pixel(16, 16, Rgb([shade, 40, 80])),
                right: RgbImage::from_pixel(16, 16, Rgb([80, shade, 40])),
                head_pose: HeadPose::new(0.1, -0.1),
                gaze: GazeAngles::new(subject as f32 / 100.0, -0.05),
            })
        }
    }

    struct Provider;

    impl DatasetProvider for Provider {
        fn open(&self, subjects: &[usize]) -> Result<Box<dyn GazeDataset>> {
            Ok(Box::new(View {
                subjects: subjects.to_vec(),
            }))
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<TrainEvent>>);

    impl TrainSink for Events {
        fn on_event(&self, event: TrainEvent) {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }

    fn tiny_hparams(loss_fn: LossKind) -> HParams {
        HParams {
            augment: false,
            loss_fn,
            batch_size: 8,
            model_base: Backbone::ResNet18,
            num_io_workers: 2,
            input_size: 32,
            seed: 7,
            ..HParams::default()
        }
    }

    fn provider() -> Arc<dyn DatasetProvider> {
        Arc::new(Provider)
    }

    #[test]
    fn test_default_hparams() {
        let hp = HParams::default();
        assert_eq!(hp.batch_size, 128);
        assert!((hp.learning_rate - 0.000_325).abs() < 1e-12);
        assert_eq!(hp.model_base, Backbone::Vgg);
        assert_eq!(hp.loss_fn, LossKind::Mse);
        assert_eq!(hp.num_io_workers, 8);
        assert_eq!(hp.input_size, 224);
    }

    #[test]
    fn test_head_width_follows_loss() {
        for (loss, width) in [(LossKind::Mse, 2), (LossKind::Pinball, 3)] {
            let module = GazeTrainingModule::new(
                tiny_hparams(loss),
                three_fold()[0].clone(),
                provider(),
                Device::Cpu,
            )
            .unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(module.model().num_out(), width);
        }
    }

    #[test]
    fn test_loaders_are_scoped_to_fold() {
        let fold = three_fold()[1].clone();
        let module =
            GazeTrainingModule::new(tiny_hparams(LossKind::Mse), fold.clone(), provider(), Device::Cpu)
                .unwrap_or_else(|e| panic!("{e}"));

        let train = module.train_loader().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(train.subjects(), fold.train.as_slice());
        assert_eq!(train.num_samples(), fold.train.len() * PER_SUBJECT);

        let val = module.val_loader().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(val.subjects(), &[14, 15, 16]);

        let test = module
            .test_loader()
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("fold has test subjects"));
        assert_eq!(test.subjects(), &[3, 4, 7, 9]);
    }

    #[test]
    fn test_overlapping_fold_rejected() {
        let fold = Fold {
            train: vec![0, 1],
            validate: vec![1],
            test: Vec::new(),
        };
        assert!(
            GazeTrainingModule::new(tiny_hparams(LossKind::Mse), fold, provider(), Device::Cpu)
                .is_err()
        );
    }

    #[test]
    fn test_input_size_bounds() {
        assert!(validate_input_size(1).is_ok());
        assert!(validate_input_size(MAX_INPUT_SIZE).is_ok());
        assert!(validate_input_size(0).is_err());
        assert!(validate_input_size(MAX_INPUT_SIZE + 1).is_err());
        assert!(validate_input_size(70_000).is_err());
    }

    #[test]
    fn test_oversized_input_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let config = RunConfig {
            hparams: HParams {
                input_size: 70_000,
                ..tiny_hparams(LossKind::Mse)
            },
            max_epochs: 1,
            save_dir: dir.path().join("run"),
            k_fold_validation: false,
            device: Device::Cpu,
        };
        let result = run(&config, &provider(), &Events::default());
        assert!(result.is_err_and(|e| e.to_string().contains("input size")));
        assert!(!dir.path().join("run").exists());
    }

    #[test]
    fn test_single_split_run_writes_checkpoints() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let config = RunConfig {
            hparams: tiny_hparams(LossKind::Pinball),
            max_epochs: 1,
            save_dir: dir.path().join("run"),
            k_fold_validation: false,
            device: Device::Cpu,
        };
        let events = Events::default();
        let report = run(&config, &provider(), &events).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(report.folds.len(), 1);
        assert!(report.folds[0].fit.test.is_none());
        assert!(report.test_summary().is_none());
        let epoch = &report.folds[0].fit.epochs[0];
        assert!(epoch.train_loss.is_finite());
        assert!(epoch.val_angle.is_finite());

        let ckpt = config.save_dir.join("fold_0").join("ckpt_epoch_0.safetensors");
        assert_eq!(epoch.checkpoint, ckpt);
        assert!(ckpt.exists());
        assert!(config.save_dir.join("hparams.json").exists());
        let metrics = fs::read_to_string(config.save_dir.join("fold_0").join(METRICS_FILE))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(metrics.lines().count(), 1);

        let net = GazeNet::load(&ckpt, Backbone::ResNet18, &Device::Cpu)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(net.num_out(), 3);

        let events = events.0.into_inner().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(events[0], TrainEvent::FoldStarted { fold: 0, folds: 1 });
        // 32 training records in batches of 8
        let batches = events
            .iter()
            .filter(|e| matches!(e, TrainEvent::BatchFinished { .. }))
            .count();
        assert_eq!(batches, 4);
        assert!(matches!(
            events.last(),
            Some(TrainEvent::EpochFinished { fold: 0, epoch: 0, .. })
        ));
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let config = RunConfig {
            hparams: tiny_hparams(LossKind::Mse),
            max_epochs: 0,
            save_dir: dir.path().to_path_buf(),
            k_fold_validation: false,
            device: Device::Cpu,
        };
        assert!(run(&config, &provider(), &Events::default()).is_err());
    }

    #[test]
    fn test_pretrained_backbone_seeds_both_branches() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let weights = dir.path().join("resnet18.safetensors");
        let source = VarMap::new();
        let vb = VarBuilder::from_varmap(&source, DType::F32, &Device::Cpu);
        Backbone::ResNet18
            .build(vb)
            .unwrap_or_else(|e| panic!("{e}"));
        source.save(&weights).unwrap_or_else(|e| panic!("{e}"));

        let hparams = HParams {
            pretrained_backbone: Some(weights),
            ..tiny_hparams(LossKind::Mse)
        };
        let module =
            GazeTrainingModule::new(hparams, three_fold()[0].clone(), provider(), Device::Cpu)
                .unwrap_or_else(|e| panic!("{e}"));

        let expected = source
            .data()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)["conv1.weight"]
            .as_tensor()
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .unwrap_or_else(|e| panic!("{e}"));
        let vars = module
            .varmap
            .data()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for branch in ["left_features", "right_features"] {
            let got = vars[&format!("{branch}.conv1.weight")]
                .as_tensor()
                .flatten_all()
                .and_then(|t| t.to_vec1::<f32>())
                .unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_unrelated_pretrained_file_rejected() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let weights = dir.path().join("other.safetensors");
        let source = VarMap::new();
        let vb = VarBuilder::from_varmap(&source, DType::F32, &Device::Cpu);
        vb.get((2, 2), "unrelated.weight")
            .unwrap_or_else(|e| panic!("{e}"));
        source.save(&weights).unwrap_or_else(|e| panic!("{e}"));

        let hparams = HParams {
            pretrained_backbone: Some(weights),
            ..tiny_hparams(LossKind::Mse)
        };
        assert!(
            GazeTrainingModule::new(hparams, three_fold()[0].clone(), provider(), Device::Cpu)
                .is_err()
        );
    }
}
