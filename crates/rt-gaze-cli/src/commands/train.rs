//! Train command - fit gaze networks on a dataset file.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use rt_gaze_adapters::SafetensorsDatasetProvider;
use rt_gaze_core::inference::{select_device, Backbone};
use rt_gaze_core::training::{
    self, HParams, LossKind, RunConfig, RunReport, DEFAULT_BATCH_SIZE, DEFAULT_INPUT_SIZE,
    DEFAULT_IO_WORKERS, DEFAULT_LEARNING_RATE, DEFAULT_MAX_EPOCHS, MAX_INPUT_SIZE,
};
use rt_gaze_core::DatasetProvider;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::output::TrainProgress;

/// Checkpoint root used when neither flag nor config names one.
const DEFAULT_SAVE_DIR: &str = "checkpoints";

fn parse_loss(s: &str) -> Result<LossKind, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_backbone(s: &str) -> Result<Backbone, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_positive_f64(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("{value} must be greater than 0"))
    }
}

fn parse_nonzero(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be greater than 0".to_string()),
        Ok(v) => Ok(v),
        Err(_) => Err(format!("'{s}' is not a valid count")),
    }
}

/// Parse an eye patch resolution within the supported range.
fn parse_input_size(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(v) if (1..=MAX_INPUT_SIZE).contains(&v) => Ok(v),
        Ok(_) => Err(format!("must be between 1 and {MAX_INPUT_SIZE}")),
        Err(_) => Err(format!("'{s}' is not a valid size")),
    }
}

/// Arguments for the train command.
///
/// Flag names keep the underscore spelling of the established training
/// scripts.
#[derive(Args, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct TrainArgs {
    /// Apply the augmentation chain to training batches
    #[arg(long, conflicts_with = "no_augment")]
    pub augment: bool,

    /// Disable augmentation (the default)
    #[arg(long = "no_augment")]
    pub no_augment: bool,

    /// Loss function: mse or pinball
    #[arg(long = "loss_fn", value_parser = parse_loss)]
    pub loss_fn: Option<LossKind>,

    /// Samples per batch
    #[arg(long = "batch_size", value_parser = parse_nonzero)]
    pub batch_size: Option<usize>,

    /// Adam learning rate
    #[arg(long = "learning_rate", value_parser = parse_positive_f64)]
    pub learning_rate: Option<f64>,

    /// Backbone: vgg, mobilenet, resnet18 or resnet50
    #[arg(long = "model_base", value_parser = parse_backbone)]
    pub model_base: Option<Backbone>,

    /// GPU ordinal; repeatable, only the first is used
    #[arg(long = "gpu", value_name = "ORDINAL")]
    pub gpu: Vec<usize>,

    /// Dataset file
    #[arg(long = "hdf5_file", value_name = "FILE")]
    pub hdf5_file: Option<PathBuf>,

    /// Checkpoint root directory
    #[arg(long = "save_dir", value_name = "DIR")]
    pub save_dir: Option<PathBuf>,

    /// Accepted for compatibility; has no effect
    #[arg(long, conflicts_with = "no_benchmark")]
    pub benchmark: bool,

    /// Accepted for compatibility; has no effect
    #[arg(long = "no-benchmark")]
    pub no_benchmark: bool,

    /// Loader threads
    #[arg(long = "num_io_workers", value_parser = parse_nonzero)]
    pub num_io_workers: Option<usize>,

    /// Train the three-fold partition (true) or the single split (false)
    #[arg(long = "k_fold_validation", value_name = "BOOL")]
    pub k_fold_validation: Option<bool>,

    /// Epochs per fold
    #[arg(long = "max_epochs", value_parser = parse_nonzero)]
    pub max_epochs: Option<usize>,

    /// Eye patch resolution
    #[arg(long = "input_size", value_parser = parse_input_size)]
    pub input_size: Option<u32>,

    /// Seed for shuffling and augmentation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Safetensors file with pretrained backbone weights
    #[arg(long = "pretrained_backbone", value_name = "FILE")]
    pub pretrained_backbone: Option<PathBuf>,

    /// Show progress bars
    #[arg(long)]
    pub progress: bool,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Augmentation setting from the config file.
    #[arg(skip)]
    config_augment: Option<bool>,
}

impl TrainArgs {
    /// Apply configuration file values, respecting CLI precedence.
    ///
    /// Layering priority (lowest to highest):
    /// 1. Hardcoded defaults (in accessor methods)
    /// 2. Config file values (XDG, then project-local)
    /// 3. CLI arguments (already set on self)
    ///
    /// # Errors
    ///
    /// Returns an error if a configured loss or backbone name is unknown.
    pub fn with_config(mut args: Self, config: &AppConfig) -> Result<Self> {
        let training = &config.training;

        args.config_augment = training.augment;
        if args.loss_fn.is_none() {
            args.loss_fn = training
                .loss_fn
                .as_deref()
                .map(str::parse::<LossKind>)
                .transpose()
                .context("Invalid training.loss_fn in config")?;
        }
        if args.model_base.is_none() {
            args.model_base = training
                .model_base
                .as_deref()
                .map(str::parse::<Backbone>)
                .transpose()
                .context("Invalid training.model_base in config")?;
        }
        args.batch_size = args.batch_size.or(training.batch_size);
        args.learning_rate = args.learning_rate.or(training.learning_rate);
        args.num_io_workers = args.num_io_workers.or(training.num_io_workers);
        args.max_epochs = args.max_epochs.or(training.max_epochs);
        args.input_size = args.input_size.or(training.input_size);
        args.seed = args.seed.or(training.seed);
        args.k_fold_validation = args.k_fold_validation.or(training.k_fold_validation);
        if args.hdf5_file.is_none() {
            args.hdf5_file.clone_from(&training.dataset);
        }
        if args.save_dir.is_none() {
            args.save_dir.clone_from(&training.save_dir);
        }
        if args.gpu.is_empty() {
            args.gpu = training.gpus.clone().unwrap_or_default();
        }
        if !args.progress {
            args.progress = config.output.progress.unwrap_or(false);
        }

        Ok(args)
    }

    /// Augmentation: `--augment` / `--no_augment` win, then config, then off.
    fn augment(&self) -> bool {
        if self.augment {
            true
        } else if self.no_augment {
            false
        } else {
            self.config_augment.unwrap_or(false)
        }
    }

    fn save_dir(&self) -> PathBuf {
        self.save_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_DIR))
    }

    /// Hyperparameters with hardcoded fallbacks.
    pub fn hparams(&self) -> HParams {
        HParams {
            augment: self.augment(),
            loss_fn: self.loss_fn.unwrap_or_default(),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            learning_rate: self.learning_rate.unwrap_or(DEFAULT_LEARNING_RATE),
            model_base: self.model_base.unwrap_or_default(),
            num_io_workers: self.num_io_workers.unwrap_or(DEFAULT_IO_WORKERS),
            input_size: self.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            seed: self.seed.unwrap_or(0),
            pretrained_backbone: self.pretrained_backbone.clone(),
        }
    }
}

/// Run the train command.
///
/// Expects `args` to have been processed through `with_config()` first.
pub fn run(args: &TrainArgs) -> Result<RunReport> {
    let dataset = args
        .hdf5_file
        .as_ref()
        .context("No dataset given; pass --hdf5_file or set training.dataset in the config")?;
    if args.benchmark || args.no_benchmark {
        debug!("--benchmark/--no-benchmark have no effect");
    }

    let hparams = args.hparams();
    info!(
        "Training {} with {} loss on {}",
        hparams.model_base,
        hparams.loss_fn,
        dataset.display()
    );
    if hparams.input_size < 32 {
        warn!(
            "Input size {} is smaller than the backbones are designed for",
            hparams.input_size
        );
    }

    let provider: Arc<dyn DatasetProvider> = Arc::new(
        SafetensorsDatasetProvider::open_file(dataset)
            .with_context(|| format!("Failed to open dataset {}", dataset.display()))?,
    );

    let config = RunConfig {
        hparams,
        max_epochs: args.max_epochs.unwrap_or(DEFAULT_MAX_EPOCHS),
        save_dir: args.save_dir(),
        k_fold_validation: args.k_fold_validation.unwrap_or(false),
        device: select_device(&args.gpu),
    };

    let show_bar = !args.quiet && (args.progress || std::io::stderr().is_terminal());
    let progress = TrainProgress::new(args.quiet, show_bar);

    let report = training::run(&config, &provider, &progress)?;

    if let Some(summary) = report.test_summary() {
        println!(
            "Test angular error over {} fold(s): {:.2}° ± {:.2}°",
            report.folds.len(),
            summary.mean,
            summary.std
        );
    }
    println!("Checkpoints written to {}", config.save_dir.display());
    Ok(report)
}
