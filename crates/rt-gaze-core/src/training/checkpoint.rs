//! Checkpoint paths and the per-fold metrics log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// File name of the metrics log inside a fold directory.
pub const METRICS_FILE: &str = "metrics.jsonl";

/// Directory holding the checkpoints of one fold.
#[must_use]
pub fn fold_dir(save_dir: &Path, fold: usize) -> PathBuf {
    save_dir.join(format!("fold_{fold}"))
}

/// Path of the checkpoint written after `epoch`.
#[must_use]
pub fn checkpoint_path(fold_dir: &Path, epoch: usize) -> PathBuf {
    fold_dir.join(format!("ckpt_epoch_{epoch}.safetensors"))
}

/// Metrics of one finished epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRecord {
    /// Fold index.
    pub fold: usize,
    /// Epoch index.
    pub epoch: usize,
    /// Mean training loss.
    pub train_loss: f32,
    /// Mean training angular error in degrees.
    pub train_angle: f32,
    /// Mean validation loss.
    pub val_loss: f32,
    /// Mean validation angular error in degrees.
    pub val_angle: f32,
    /// Checkpoint written for this epoch.
    pub checkpoint: PathBuf,
}

/// Result of the held-out test pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestRecord {
    /// Fold index.
    pub fold: usize,
    /// Mean angular error in degrees.
    pub test_angle_mean: f32,
    /// Standard deviation of the per-batch angular error.
    pub test_angle_std: f32,
}

/// Append-only JSON Lines log.
pub struct MetricsLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl MetricsLog {
    /// Opens (or creates) the log in `dir`, creating the directory as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(METRICS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Appends one record and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    /// Location of the log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
