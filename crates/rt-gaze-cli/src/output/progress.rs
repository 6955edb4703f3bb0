//! Progress bar adapters using indicatif.

use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};
use rt_gaze_core::{ProgressEvent, ProgressSink, TrainEvent, TrainSink};

fn styled(bar: &IndicatifBar, template: &str) {
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        bar.set_style(style.progress_chars("#>-"));
    }
}

/// Inference progress bar.
pub struct ProgressBar {
    bar: Option<IndicatifBar>,
    quiet: bool,
}

impl ProgressBar {
    /// Creates a new progress bar.
    ///
    /// # Arguments
    ///
    /// * `total` - Total number of items, if known
    /// * `quiet` - If true, suppress all output
    /// * `show_bar` - If true, show progress bar; otherwise only skips are reported
    #[must_use]
    pub fn new(total: Option<u64>, quiet: bool, show_bar: bool) -> Self {
        if quiet {
            return Self {
                bar: None,
                quiet: true,
            };
        }

        let bar = show_bar.then(|| {
            let bar = total.map_or_else(IndicatifBar::new_spinner, IndicatifBar::new);
            styled(
                &bar,
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            );
            bar
        });

        Self { bar, quiet }
    }
}

impl ProgressSink for ProgressBar {
    fn on_event(&self, event: ProgressEvent) {
        if self.quiet {
            return;
        }

        match event {
            ProgressEvent::Started { path, index, total } => {
                if let Some(bar) = &self.bar {
                    if let Some(t) = total {
                        bar.set_length(t as u64);
                    }
                    bar.set_position(index as u64);
                    bar.set_message(path);
                }
            }
            ProgressEvent::Completed { .. } => {
                if let Some(bar) = &self.bar {
                    bar.inc(1);
                }
            }
            ProgressEvent::Skipped { path, reason } => {
                if let Some(bar) = &self.bar {
                    bar.inc(1);
                }
                eprintln!("WARN: Skipping {path}: {reason}");
            }
            ProgressEvent::Finished { processed, skipped } => {
                if let Some(bar) = &self.bar {
                    bar.finish_with_message(format!(
                        "Done: {processed} estimated, {skipped} skipped"
                    ));
                }
            }
        }
    }
}

/// Training progress: one bar per epoch plus a summary line per epoch.
pub struct TrainProgress {
    bar: Mutex<Option<IndicatifBar>>,
    quiet: bool,
    show_bar: bool,
}

impl TrainProgress {
    /// Creates a training reporter.
    #[must_use]
    pub const fn new(quiet: bool, show_bar: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            quiet,
            show_bar,
        }
    }

    fn with_bar(&self, f: impl FnOnce(&IndicatifBar)) {
        if let Some(bar) = self
            .bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            f(bar);
        }
    }
}

impl TrainSink for TrainProgress {
    fn on_event(&self, event: TrainEvent) {
        if self.quiet {
            return;
        }

        match event {
            TrainEvent::FoldStarted { fold, folds } => {
                eprintln!("Fold {}/{folds}", fold + 1);
            }
            TrainEvent::EpochStarted {
                epoch, batches, ..
            } => {
                if self.show_bar {
                    let bar = IndicatifBar::new(batches as u64);
                    styled(
                        &bar,
                        "epoch {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                    );
                    bar.set_prefix(epoch.to_string());
                    *self.bar.lock().unwrap_or_else(PoisonError::into_inner) = Some(bar);
                }
            }
            TrainEvent::BatchFinished { loss, angle } => {
                self.with_bar(|bar| {
                    bar.set_message(format!("loss {loss:.4} angle {angle:.2}°"));
                    bar.inc(1);
                });
            }
            TrainEvent::EpochFinished {
                epoch,
                train_loss,
                val_loss,
                val_angle,
                checkpoint,
                ..
            } => {
                if let Some(bar) = self
                    .bar
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                {
                    bar.finish_and_clear();
                }
                eprintln!(
                    "epoch {epoch}: train_loss {train_loss:.4} val_loss {val_loss:.4} \
                     val_angle {val_angle:.2}° -> {checkpoint}"
                );
            }
            TrainEvent::TestFinished { fold, mean, std } => {
                eprintln!("fold {fold} test angular error: {mean:.2}° ± {std:.2}°");
            }
        }
    }
}
