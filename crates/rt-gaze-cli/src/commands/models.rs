//! Models command - manage detector models.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rt_gaze_adapters::models::{
    all_models_installed, ensure_models, list_models as adapter_list_models, models_dir,
    ProgressCallback, MODELS,
};
use rt_gaze_adapters::set_models_dir;

use crate::config::AppConfig;

/// Environment variable holding the model download base URL.
const MODELS_URL_ENV: &str = "RT_GAZE_MODELS_URL";

/// Arguments for the models command
#[derive(Args)]
pub struct ModelsArgs {
    /// Custom models directory (overrides default and config)
    #[arg(long, value_name = "DIR", global = true)]
    pub models_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Models subcommands
#[derive(Subcommand)]
pub enum ModelsCommand {
    /// Download required models
    Fetch {
        /// Base URL to download from (overrides config and RT_GAZE_MODELS_URL)
        #[arg(long)]
        url: Option<String>,

        /// Download again even if installed
        #[arg(long)]
        force: bool,
    },
    /// List installed models
    List,
    /// Print model directory path
    Path,
}

/// Run the models command.
pub fn run(args: &ModelsArgs, config: &AppConfig) -> Result<()> {
    if let Some(dir) = args.models_dir.clone().or_else(|| config.models.dir.clone()) {
        set_models_dir(Some(dir));
    }

    match &args.command {
        ModelsCommand::Fetch { url, force } => {
            let base = url
                .clone()
                .or_else(|| config.models.url.clone())
                .or_else(|| std::env::var(MODELS_URL_ENV).ok())
                .with_context(|| {
                    format!("No download URL; pass --url, set models.url or {MODELS_URL_ENV}")
                })?;
            fetch_models(&base, *force)
        }
        ModelsCommand::List => {
            list_models();
            Ok(())
        }
        ModelsCommand::Path => {
            println!("{}", models_dir().display());
            Ok(())
        }
    }
}

fn fetch_models(base_url: &str, force: bool) -> Result<()> {
    let pb = Arc::new(ProgressBar::new(0));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
            .map_err(|e| anyhow::anyhow!("Invalid progress template: {e}"))?
            .progress_chars("#>-"),
    );

    let current_model: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let pb_clone = Arc::clone(&pb);
    let model_clone = Arc::clone(&current_model);

    let progress: ProgressCallback =
        Box::new(move |name: &str, downloaded: u64, total: Option<u64>| {
            let is_new_model = {
                let mut current = model_clone.lock().unwrap_or_else(PoisonError::into_inner);
                if *current == name {
                    false
                } else {
                    *current = name.to_string();
                    true
                }
            };
            if is_new_model {
                if let Some(t) = total {
                    pb_clone.set_length(t);
                }
                pb_clone.set_message(name.to_string());
            }
            pb_clone.set_position(downloaded);
        });

    let written = ensure_models(base_url, force, Some(&progress))?;

    if written.is_empty() {
        pb.finish_and_clear();
        println!("All models already installed");
    } else {
        pb.finish_with_message(format!("Downloaded {} model(s)", written.len()));
    }
    Ok(())
}

fn list_models() {
    let models = adapter_list_models();
    let dir = models_dir();

    println!("Models directory: {}", dir.display());
    println!();

    for (name, installed) in &models {
        let status = if *installed { "✓" } else { "✗" };
        let info = MODELS.iter().find(|m| m.name == name);
        let filename = info.map_or("unknown", |m| m.filename);
        let description = info.map_or("", |m| m.description);
        println!("  {status} {name} ({filename}) {description}");
    }

    println!();
    let installed_count = models.iter().filter(|(_, installed)| *installed).count();
    println!("{}/{} models installed", installed_count, models.len());
    if !all_models_installed() {
        println!("Run `rt-gaze models fetch` to download the missing models.");
    }
}
