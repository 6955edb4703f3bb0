//! CLI command definitions and handlers.

pub mod dataset;
pub mod infer;
pub mod models;
pub mod train;

use clap::{Parser, Subcommand};

/// rt-gaze - appearance-based gaze estimation
#[derive(Parser)]
#[command(name = "rt-gaze")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Train gaze networks on a dataset file
    Train(train::TrainArgs),
    /// Estimate gaze in images with a checkpoint ensemble
    Infer(infer::InferArgs),
    /// Inspect dataset files
    Dataset(dataset::DatasetArgs),
    /// Manage detector models
    Models(models::ModelsArgs),
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// The command finished.
    Success,
    /// Inference ran but no frame produced an estimate.
    NoEstimates,
    /// The command failed.
    Error,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => Self::SUCCESS,
            ExitCode::NoEstimates => Self::from(1),
            ExitCode::Error => Self::from(2),
        }
    }
}

/// Generate ISO 8601 UTC timestamp (RFC 3339 format).
pub fn iso_timestamp() -> String {
    match time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339) {
        Ok(ts) => ts,
        Err(e) => {
            tracing::debug!("Timestamp format failed: {e}");
            String::from("1970-01-01T00:00:00Z")
        }
    }
}
