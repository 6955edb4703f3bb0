//! Configuration file support for rt-gaze.
//!
//! Supports TOML configuration from:
//! - XDG config: `~/.config/rt-gaze/config.toml` (lowest priority)
//! - Project-local: `.rt-gaze.toml` (searched up directory tree)
//! - CLI flags (highest priority, applied separately)

use std::path::{Path, PathBuf};

use rt_gaze_core::training::MAX_INPUT_SIZE;
use serde::Deserialize;
use tracing::{debug, info};

/// Top-level configuration structure.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General options.
    pub general: GeneralConfig,
    /// Inference settings.
    pub inference: InferenceConfig,
    /// Training settings.
    pub training: TrainingConfig,
    /// Model settings.
    pub models: ModelsConfig,
    /// Output formatting settings.
    pub output: OutputConfig,
}

/// General configuration options.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Recurse into subdirectories by default.
    pub recursive: Option<bool>,
}

/// Inference configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Gaze checkpoints forming the ensemble.
    pub checkpoints: Option<Vec<PathBuf>>,
    /// Backbone of the checkpoints.
    pub model_base: Option<String>,
    /// 3-D face model file for the head pose solve.
    pub face_model: Option<PathBuf>,
    /// Yaw bound in radians.
    pub max_yaw: Option<f32>,
    /// Minimum face detection confidence.
    pub min_face_score: Option<f32>,
    /// Eye patch resolution.
    pub input_size: Option<u32>,
}

/// Training configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Dataset file.
    pub dataset: Option<PathBuf>,
    /// Checkpoint root directory.
    pub save_dir: Option<PathBuf>,
    /// Apply training augmentation.
    pub augment: Option<bool>,
    /// Loss function: "mse" or "pinball".
    pub loss_fn: Option<String>,
    /// Backbone to train.
    pub model_base: Option<String>,
    /// Samples per batch.
    pub batch_size: Option<usize>,
    /// Adam learning rate.
    pub learning_rate: Option<f64>,
    /// Loader threads.
    pub num_io_workers: Option<usize>,
    /// Epochs per fold.
    pub max_epochs: Option<usize>,
    /// Eye patch resolution.
    pub input_size: Option<u32>,
    /// Run the three-fold partition.
    pub k_fold_validation: Option<bool>,
    /// Shuffle and augmentation seed.
    pub seed: Option<u64>,
    /// GPU ordinals.
    pub gpus: Option<Vec<usize>>,
}

/// Model configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Custom models directory path.
    pub dir: Option<PathBuf>,
    /// Base URL the detector weights are downloaded from.
    pub url: Option<String>,
}

/// Output formatting configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format: "json" or "jsonl".
    pub format: Option<String>,
    /// Pretty-print JSON output.
    pub pretty: Option<bool>,
    /// Show progress bar.
    pub progress: Option<bool>,
    /// Directory for eye-patch visualizations.
    pub dir: Option<PathBuf>,
}

const BACKBONES: [&str; 4] = ["vgg", "mobilenet", "resnet18", "resnet50"];

impl AppConfig {
    /// Load configuration from XDG and project-local files.
    ///
    /// Priority (lowest to highest):
    /// 1. XDG config: `~/.config/rt-gaze/config.toml`
    /// 2. Project-local: `.rt-gaze.toml` (searched up from cwd)
    ///
    /// Missing files are silently ignored. Invalid values are logged as warnings.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(xdg_path) = xdg_config_path() {
            if xdg_path.exists() {
                info!("Loading XDG config: {}", xdg_path.display());
                if let Some(xdg_config) = load_file(&xdg_path) {
                    config = xdg_config;
                }
            } else {
                debug!("XDG config not found: {}", xdg_path.display());
            }
        }

        if let Some(project_path) = find_project_config() {
            info!("Loading project config: {}", project_path.display());
            if let Some(project_config) = load_file(&project_path) {
                config.merge(project_config);
            }
        }

        if let Err(e) = config.validate() {
            eprintln!("warning: {e}");
        }

        config
    }

    /// Validate configuration values are within acceptable ranges.
    fn validate(&self) -> Result<(), String> {
        if let Some(s) = self.inference.min_face_score {
            if !(0.0..=1.0).contains(&s) {
                return Err(format!("inference.min_face_score must be 0.0-1.0, got {s}"));
            }
        }
        if let Some(y) = self.inference.max_yaw {
            if !y.is_finite() || y <= 0.0 {
                return Err(format!("inference.max_yaw must be a positive angle, got {y}"));
            }
        }
        for (key, base) in [
            ("inference.model_base", &self.inference.model_base),
            ("training.model_base", &self.training.model_base),
        ] {
            if let Some(b) = base {
                if !BACKBONES.contains(&b.as_str()) {
                    return Err(format!(
                        "{key} must be one of {}, got '{b}'",
                        BACKBONES.join(", ")
                    ));
                }
            }
        }
        if let Some(ref l) = self.training.loss_fn {
            if l != "mse" && l != "pinball" {
                return Err(format!(
                    "training.loss_fn must be 'mse' or 'pinball', got '{l}'"
                ));
            }
        }
        if self.training.batch_size == Some(0) {
            return Err("training.batch_size must be greater than 0".to_string());
        }
        if let Some(lr) = self.training.learning_rate {
            if !lr.is_finite() || lr <= 0.0 {
                return Err(format!("training.learning_rate must be positive, got {lr}"));
            }
        }
        if self.training.max_epochs == Some(0) {
            return Err("training.max_epochs must be greater than 0".to_string());
        }
        for (key, size) in [
            ("inference.input_size", self.inference.input_size),
            ("training.input_size", self.training.input_size),
        ] {
            if let Some(size) = size {
                if !(1..=MAX_INPUT_SIZE).contains(&size) {
                    return Err(format!("{key} must be 1-{MAX_INPUT_SIZE}, got {size}"));
                }
            }
        }

        if let Some(ref f) = self.output.format {
            if f != "json" && f != "jsonl" {
                return Err(format!(
                    "output.format must be 'json' or 'jsonl', got '{f}'"
                ));
            }
        }

        Ok(())
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` when present.
    fn merge(&mut self, other: Self) {
        self.general.recursive = other.general.recursive.or(self.general.recursive);

        let inference = &mut self.inference;
        inference.checkpoints = other.inference.checkpoints.or_else(|| inference.checkpoints.take());
        inference.model_base = other.inference.model_base.or_else(|| inference.model_base.take());
        inference.face_model = other.inference.face_model.or_else(|| inference.face_model.take());
        inference.max_yaw = other.inference.max_yaw.or(inference.max_yaw);
        inference.min_face_score = other.inference.min_face_score.or(inference.min_face_score);
        inference.input_size = other.inference.input_size.or(inference.input_size);

        let training = &mut self.training;
        training.dataset = other.training.dataset.or_else(|| training.dataset.take());
        training.save_dir = other.training.save_dir.or_else(|| training.save_dir.take());
        training.augment = other.training.augment.or(training.augment);
        training.loss_fn = other.training.loss_fn.or_else(|| training.loss_fn.take());
        training.model_base = other.training.model_base.or_else(|| training.model_base.take());
        training.batch_size = other.training.batch_size.or(training.batch_size);
        training.learning_rate = other.training.learning_rate.or(training.learning_rate);
        training.num_io_workers = other.training.num_io_workers.or(training.num_io_workers);
        training.max_epochs = other.training.max_epochs.or(training.max_epochs);
        training.input_size = other.training.input_size.or(training.input_size);
        training.k_fold_validation = other
            .training
            .k_fold_validation
            .or(training.k_fold_validation);
        training.seed = other.training.seed.or(training.seed);
        training.gpus = other.training.gpus.or_else(|| training.gpus.take());

        self.models.dir = other.models.dir.or_else(|| self.models.dir.take());
        self.models.url = other.models.url.or_else(|| self.models.url.take());

        self.output.format = other.output.format.or_else(|| self.output.format.take());
        self.output.pretty = other.output.pretty.or(self.output.pretty);
        self.output.progress = other.output.progress.or(self.output.progress);
        self.output.dir = other.output.dir.or_else(|| self.output.dir.take());
    }
}

/// Get the XDG config file path.
fn xdg_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rt-gaze").join("config.toml"))
}

/// Find project-local config by searching up from current directory.
fn find_project_config() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_parents(&cwd)
}

/// Search for `.rt-gaze.toml` in the given directory and its parents.
fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        let config_path = dir.join(".rt-gaze.toml");
        if config_path.exists() {
            return Some(config_path);
        }
        current = dir.parent();
    }

    None
}

/// Load and parse a TOML config file.
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}
