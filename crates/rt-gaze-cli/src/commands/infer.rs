//! Infer command - estimate gaze in images.

use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use rt_gaze_adapters::{model_path, set_models_dir, FsImageSource};
use rt_gaze_core::inference::{
    get_device, Backbone, CnnLandmarker, GazeEnsemble, DEFAULT_MIN_FACE_SCORE,
};
use rt_gaze_core::pose::FaceModel;
use rt_gaze_core::training::{DEFAULT_INPUT_SIZE, MAX_INPUT_SIZE};
use rt_gaze_core::{
    render_estimate, FrameOutcome, GazePipeline, GazeResult, ImageInfo, ImageSource,
    PipelineConfig, ProgressEvent, ProgressSink, ResultOutput,
};
use tracing::{debug, info};

use super::{iso_timestamp, ExitCode};
use crate::config::AppConfig;
use crate::output::{JsonOutput, ProgressBar};

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// JSON Lines (one JSON object per line)
    #[default]
    Jsonl,
    /// Single JSON array
    Json,
}

/// Parse and validate a score threshold (0.0-1.0).
fn parse_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not in 0.0..=1.0"))
    }
}

/// Parse a positive angle in radians.
fn parse_angle(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("{value} must be a positive angle in radians"))
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

fn parse_backbone(s: &str) -> Result<Backbone, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

/// Arguments for the infer command.
#[derive(Args, Clone)]
pub struct InferArgs {
    /// Files or directories to analyze
    pub paths: Vec<PathBuf>,

    /// Gaze checkpoint; repeat to average an ensemble
    #[arg(short, long = "checkpoint", value_name = "FILE")]
    pub checkpoints: Vec<PathBuf>,

    /// Backbone the checkpoints were trained with
    #[arg(long = "model_base", alias = "model-base", value_parser = parse_backbone)]
    pub model_base: Option<Backbone>,

    /// 3-D face model file for the head pose solve
    #[arg(long, value_name = "FILE")]
    pub face_model: Option<PathBuf>,

    /// Bound on the head-pose yaw, in radians
    #[arg(long, value_parser = parse_angle)]
    pub max_yaw: Option<f32>,

    /// Minimum face detection confidence (0.0-1.0)
    #[arg(long, value_parser = parse_threshold)]
    pub min_face_score: Option<f32>,

    /// Eye patch resolution
    #[arg(long, value_parser = parse_input_size)]
    pub input_size: Option<u32>,

    /// Write eye-patch visualizations to this directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Recurse into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Show progress bar
    #[arg(long)]
    pub progress: bool,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Pretty-print JSON output (only affects --format json)
    #[arg(long)]
    pub pretty: bool,

    /// Custom models directory (overrides default and config)
    #[arg(long, value_name = "DIR")]
    pub models_dir: Option<PathBuf>,
}

impl InferArgs {
    /// Apply configuration file values, respecting CLI precedence.
    ///
    /// Layering priority (lowest to highest):
    /// 1. Hardcoded defaults (in accessor methods)
    /// 2. Config file values (XDG, then project-local)
    /// 3. CLI arguments (already set on self)
    ///
    /// # Errors
    ///
    /// Returns an error if the configured backbone name is unknown.
    pub fn with_config(mut args: Self, config: &AppConfig) -> Result<Self> {
        let inference = &config.inference;

        if !args.recursive {
            args.recursive = config.general.recursive.unwrap_or(false);
        }
        if args.checkpoints.is_empty() {
            args.checkpoints = inference.checkpoints.clone().unwrap_or_default();
        }
        if args.model_base.is_none() {
            args.model_base = inference
                .model_base
                .as_deref()
                .map(str::parse::<Backbone>)
                .transpose()
                .context("Invalid inference.model_base in config")?;
        }
        if args.face_model.is_none() {
            args.face_model.clone_from(&inference.face_model);
        }
        args.max_yaw = args.max_yaw.or(inference.max_yaw);
        args.min_face_score = args.min_face_score.or(inference.min_face_score);
        args.input_size = args.input_size.or(inference.input_size);

        if args.format.is_none() {
            args.format = config
                .output
                .format
                .as_ref()
                .and_then(|s| match s.as_str() {
                    "json" => Some(OutputFormat::Json),
                    "jsonl" => Some(OutputFormat::Jsonl),
                    _ => None,
                });
        }
        if !args.pretty {
            args.pretty = config.output.pretty.unwrap_or(false);
        }
        if !args.progress {
            args.progress = config.output.progress.unwrap_or(false);
        }
        if args.output_dir.is_none() {
            args.output_dir.clone_from(&config.output.dir);
        }
        if args.models_dir.is_none() {
            args.models_dir.clone_from(&config.models.dir);
        }

        Ok(args)
    }

    fn format(&self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Jsonl)
    }

    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();
        let face_model = match &self.face_model {
            Some(path) => FaceModel::load(path)?,
            None => defaults.face_model,
        };
        Ok(PipelineConfig {
            input_size: self.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            max_yaw: self.max_yaw.unwrap_or(defaults.max_yaw),
            face_model,
            min_face_score: self.min_face_score.unwrap_or(DEFAULT_MIN_FACE_SCORE),
        })
    }
}

/// Result of running the infer command.
#[allow(dead_code)] // Fields exposed for programmatic use
pub struct InferResult {
    /// Frames with a gaze estimate.
    pub processed: usize,
    /// Frames skipped or unreadable.
    pub skipped: usize,
    /// Exit code.
    pub exit_code: ExitCode,
}

/// Run the infer command.
///
/// Expects `args` to have been processed through `with_config()` first.
pub fn run(args: &InferArgs) -> Result<InferResult> {
    info!("Running inference on {} paths", args.paths.len());

    if args.paths.is_empty() {
        anyhow::bail!("No paths specified");
    }
    if args.checkpoints.is_empty() {
        anyhow::bail!("No checkpoints given; pass --checkpoint or set inference.checkpoints");
    }

    if let Some(ref models_dir) = args.models_dir {
        debug!("Using custom models directory: {}", models_dir.display());
        set_models_dir(Some(models_dir.clone()));
    }

    let device = get_device();
    let backbone = args.model_base.unwrap_or_default();
    let ensemble = GazeEnsemble::load(&args.checkpoints, backbone, &device)?;
    info!("Ensemble: {}", ensemble.member_names().join(", "));

    let detector = installed_model("blazeface")?;
    let landmarks = installed_model("landmarks68")?;
    let config = args.pipeline_config()?;
    let landmarker =
        CnnLandmarker::new(detector, landmarks, &device).with_min_score(config.min_face_score);
    let pipeline = GazePipeline::new(Box::new(landmarker), Box::new(ensemble), config, device)?;

    if let Some(ref dir) = args.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let source = FsImageSource::new(args.paths.clone(), args.recursive);
    let total = source.count_hint();
    let show_progress = !args.quiet && (args.progress || std::io::stderr().is_terminal());
    let progress_bar = ProgressBar::new(total.map(|t| t as u64), args.quiet, show_progress);
    let output = JsonOutput::stdout();

    process_images(&source, &pipeline, &output, &progress_bar, args)
}

/// Path of an installed detector model.
fn installed_model(name: &str) -> Result<PathBuf> {
    let path = model_path(name).with_context(|| format!("Unknown model '{name}'"))?;
    if !path.exists() {
        anyhow::bail!(
            "{} not found. Run `rt-gaze models fetch` or pass --models-dir.",
            path.display()
        );
    }
    Ok(path)
}

/// Run every frame through the pipeline and write the results.
fn process_images(
    source: &FsImageSource,
    pipeline: &GazePipeline,
    output: &JsonOutput,
    progress: &ProgressBar,
    args: &InferArgs,
) -> Result<InferResult> {
    let total = source.count_hint();
    let mut processed = 0usize;
    let mut skipped = 0usize;
    let mut all_results: Vec<GazeResult> = Vec::new();

    for (index, image_result) in source.images().enumerate() {
        let image = match image_result {
            Ok(img) => img,
            Err(e) => {
                progress.on_event(ProgressEvent::Skipped {
                    path: format!("image {index}"),
                    reason: format!("{e:#}"),
                });
                skipped += 1;
                continue;
            }
        };

        progress.on_event(ProgressEvent::Started {
            path: image.path.clone(),
            index,
            total,
        });

        let estimate = match pipeline.process(&image)? {
            FrameOutcome::Estimated(estimate) => estimate,
            FrameOutcome::Skipped(reason) => {
                progress.on_event(ProgressEvent::skipped(image.path.clone(), reason));
                skipped += 1;
                continue;
            }
        };

        let mut result = GazeResult::from_estimate(&image, &estimate, iso_timestamp());
        if let Some(ref dir) = args.output_dir {
            if let Some(vis) = render_estimate(&estimate) {
                let path = visualization_path(dir, &image, index);
                vis.save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                result.visualization = Some(path.to_string_lossy().into_owned());
            }
        }

        progress.on_event(ProgressEvent::Completed {
            result: result.clone(),
        });

        match args.format() {
            OutputFormat::Jsonl => output.write(&result)?,
            OutputFormat::Json => all_results.push(result),
        }
        processed += 1;
    }

    if matches!(args.format(), OutputFormat::Json) {
        output.write_array(&all_results, args.pretty)?;
    }
    output.flush()?;

    progress.on_event(ProgressEvent::Finished { processed, skipped });

    let exit_code = if processed == 0 && skipped > 0 {
        ExitCode::NoEstimates
    } else {
        ExitCode::Success
    };

    Ok(InferResult {
        processed,
        skipped,
        exit_code,
    })
}

/// `<dir>/<index>_<stem>_gaze.png`; the index keeps same-named frames from
/// different directories apart.
fn visualization_path(dir: &Path, image: &ImageInfo, index: usize) -> PathBuf {
    let stem = Path::new(&image.path)
        .file_stem()
        .map_or_else(|| "frame".to_string(), |s| s.to_string_lossy().into_owned());
    dir.join(format!("{index:05}_{stem}_gaze.png"))
}
