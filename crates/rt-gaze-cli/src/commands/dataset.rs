//! Dataset command - inspect dataset files.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use rt_gaze_adapters::dataset_info;

use crate::output::JsonOutput;

/// Arguments for the dataset command
#[derive(Args)]
pub struct DatasetArgs {
    #[command(subcommand)]
    pub command: DatasetCommand,
}

/// Dataset subcommands
#[derive(Subcommand)]
pub enum DatasetCommand {
    /// Print subjects, record counts and patch sizes as JSON
    Info {
        /// Dataset file
        file: PathBuf,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
}

/// Run the dataset command.
pub fn run(args: &DatasetArgs) -> Result<()> {
    match &args.command {
        DatasetCommand::Info { file, pretty } => {
            let summary = dataset_info(file)?;
            JsonOutput::stdout().write_value(&summary, *pretty)
        }
    }
}
