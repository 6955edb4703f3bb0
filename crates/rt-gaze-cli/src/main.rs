//! rt-gaze CLI - train and run appearance-based gaze estimators.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{Cli, Commands, ExitCode};
use config::AppConfig;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = AppConfig::load();

    let result = match cli.command {
        Commands::Train(args) => commands::train::TrainArgs::with_config(args, &config)
            .and_then(|args| commands::train::run(&args))
            .map(|_| ExitCode::Success),
        Commands::Infer(args) => commands::infer::InferArgs::with_config(args, &config)
            .and_then(|args| commands::infer::run(&args))
            .map(|result| result.exit_code),
        Commands::Dataset(ref args) => commands::dataset::run(args).map(|()| ExitCode::Success),
        Commands::Models(ref args) => {
            commands::models::run(args, &config).map(|()| ExitCode::Success)
        }
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::Error
        }
    };

    exit_code.into()
}
