//! Model weights directory and download adapter.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Model metadata.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model name/identifier.
    pub name: &'static str,
    /// What the model does.
    pub description: &'static str,
    /// Filename in the models directory and under the download base URL.
    pub filename: &'static str,
    /// Expected SHA-256 of the file; `None` skips verification.
    pub sha256: Option<&'static str>,
}

/// Weights the inference pipeline needs besides the gaze checkpoints.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "blazeface",
        description: "face detector",
        filename: "blazeface.safetensors",
        sha256: None,
    },
    ModelInfo {
        name: "landmarks68",
        description: "68-point facial landmark regressor",
        filename: "landmarks68.safetensors",
        sha256: None,
    },
];

/// Called with the model name, bytes received and the total size if known.
pub type ProgressCallback = Box<dyn Fn(&str, u64, Option<u64>) + Send + Sync>;

const CHUNK_SIZE: usize = 64 * 1024;

static MODELS_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Overrides the models directory for this process; `None` restores the
/// default.
pub fn set_models_dir(dir: Option<PathBuf>) {
    *MODELS_DIR_OVERRIDE
        .write()
        .unwrap_or_else(PoisonError::into_inner) = dir;
}

/// Returns the models directory path.
///
/// Uses the override from [`set_models_dir`] if set, otherwise
/// `XDG_DATA_HOME/rt-gaze/models` or `~/.local/share/rt-gaze/models`.
#[must_use]
pub fn models_dir() -> PathBuf {
    if let Some(dir) = MODELS_DIR_OVERRIDE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
    {
        return dir;
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rt-gaze")
        .join("models")
}

/// Returns the path to a specific model file.
#[must_use]
pub fn model_path(name: &str) -> Option<PathBuf> {
    MODELS
        .iter()
        .find(|m| m.name == name)
        .map(|m| models_dir().join(m.filename))
}

/// Download URL of `model` under `base_url`.
#[must_use]
pub fn model_url(base_url: &str, model: &ModelInfo) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), model.filename)
}

/// Checks if all models are installed.
#[must_use]
pub fn all_models_installed() -> bool {
    let dir = models_dir();
    MODELS.iter().all(|m| dir.join(m.filename).exists())
}

/// Lists known models with their install status.
#[must_use]
pub fn list_models() -> Vec<(String, bool)> {
    let dir = models_dir();
    MODELS
        .iter()
        .map(|m| (m.name.to_string(), dir.join(m.filename).exists()))
        .collect()
}

/// Downloads every missing model from `base_url`.
///
/// With `force`, installed models are downloaded again. Returns the paths
/// that were written.
///
/// # Errors
///
/// Returns an error if:
/// - The models directory cannot be created
/// - A model download fails
/// - A model's checksum doesn't match
pub fn ensure_models(
    base_url: &str,
    force: bool,
    progress: Option<&ProgressCallback>,
) -> Result<Vec<PathBuf>> {
    let dir = models_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create models directory {}", dir.display()))?;

    let mut written = Vec::new();
    for model in MODELS {
        let path = dir.join(model.filename);
        if path.exists() && !force {
            debug!("Model {} already exists", model.name);
            continue;
        }
        download_model(model, &model_url(base_url, model), &path, progress)?;
        written.push(path);
    }
    Ok(written)
}

/// Downloads a model, verifying the checksum before moving it into place.
fn download_model(
    model: &ModelInfo,
    url: &str,
    path: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<()> {
    info!("Downloading model {} from {url}", model.name);

    let mut response = reqwest::blocking::get(url)
        .with_context(|| format!("Failed to download {}", model.name))?;
    if !response.status().is_success() {
        anyhow::bail!(
            "Download of {} failed with status: {}",
            model.name,
            response.status()
        );
    }
    let total = response.content_length();

    let partial = path.with_extension("part");
    let mut file = fs::File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received = 0u64;
    loop {
        let n = response
            .read(&mut buf)
            .with_context(|| format!("Failed to read response for {}", model.name))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        received += n as u64;
        if let Some(cb) = progress {
            cb(model.name, received, total);
        }
    }
    file.flush()?;
    drop(file);

    let hash = format!("{:x}", hasher.finalize());
    if let Err(e) = verify_checksum(model, &hash) {
        let _ = fs::remove_file(&partial);
        return Err(e.context(format!(
            "Try deleting {} and re-running to download a fresh copy.",
            path.display()
        )));
    }

    fs::rename(&partial, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    info!("Downloaded {} ({received} bytes)", model.name);
    Ok(())
}

fn verify_checksum(model: &ModelInfo, hash: &str) -> Result<()> {
    match model.sha256 {
        None => {
            debug!("No checksum recorded for {}, skipping verification", model.name);
            Ok(())
        }
        Some(expected) if expected.eq_ignore_ascii_case(hash) => Ok(()),
        Some(expected) => anyhow::bail!(
            "Checksum mismatch for {}: expected {expected}, got {hash}",
            model.name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_dir_and_override() {
        assert!(models_dir().ends_with("rt-gaze/models"));

        let custom = PathBuf::from("/tmp/rt-gaze-models-test");
        set_models_dir(Some(custom.clone()));
        assert_eq!(models_dir(), custom);
        let path = model_path("blazeface").unwrap_or_else(|| panic!("should have path"));
        assert_eq!(path, custom.join("blazeface.safetensors"));

        set_models_dir(None);
        assert!(models_dir().ends_with("rt-gaze/models"));
    }

    #[test]
    fn test_model_path_unknown() {
        assert!(model_path("unknown").is_none());
    }

    #[test]
    fn test_model_url_joins_base() {
        let model = &MODELS[1];
        assert_eq!(
            model_url("https://models.test/v1/", model),
            "https://models.test/v1/landmarks68.safetensors"
        );
    }

    #[test]
    fn test_verify_checksum() {
        let mut model = MODELS[0].clone();
        assert!(verify_checksum(&model, "abc").is_ok());
        model.sha256 = Some("ABC");
        assert!(verify_checksum(&model, "abc").is_ok());
        assert!(verify_checksum(&model, "abd").is_err());
    }
}
