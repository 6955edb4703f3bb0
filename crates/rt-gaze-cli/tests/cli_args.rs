//! CLI argument validation tests.
//!
//! Tests command-line argument parsing, validation, and error handling.

#![allow(clippy::unwrap_used)]
#![allow(deprecated)] // cargo_bin deprecation

use assert_cmd::Command;
use predicates::prelude::*;

fn rt_gaze() -> Command {
    Command::cargo_bin("rt-gaze").unwrap()
}

// === Top level ===

#[test]
fn test_help_lists_subcommands() {
    rt_gaze().arg("--help").assert().success().stdout(
        predicate::str::contains("train")
            .and(predicate::str::contains("infer"))
            .and(predicate::str::contains("dataset"))
            .and(predicate::str::contains("models")),
    );
}

#[test]
fn test_missing_subcommand_is_usage_error() {
    rt_gaze().assert().failure().code(2);
}

// === Train ===

#[test]
fn test_train_help_uses_underscore_flags() {
    rt_gaze().args(["train", "--help"]).assert().success().stdout(
        predicate::str::contains("--loss_fn")
            .and(predicate::str::contains("--batch_size"))
            .and(predicate::str::contains("--hdf5_file"))
            .and(predicate::str::contains("--k_fold_validation"))
            .and(predicate::str::contains("--no-benchmark")),
    );
}

#[test]
fn test_train_rejects_unknown_loss() {
    rt_gaze()
        .args(["train", "--loss_fn", "huber"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown loss function 'huber'"));
}

#[test]
fn test_train_rejects_unknown_model_base() {
    rt_gaze()
        .args(["train", "--model_base", "alexnet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown model base 'alexnet'"));
}

#[test]
fn test_train_rejects_zero_batch_size() {
    rt_gaze()
        .args(["train", "--batch_size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be greater than 0"));
}

#[test]
fn test_train_rejects_out_of_range_input_size() {
    for size in ["0", "70000"] {
        rt_gaze()
            .args(["train", "--input_size", size])
            .assert()
            .failure()
            .stderr(predicate::str::contains("must be between 1 and 4096"));
    }
}

#[test]
fn test_train_k_fold_takes_bool_value() {
    rt_gaze()
        .args(["train", "--k_fold_validation", "maybe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("maybe"));
}

#[test]
fn test_train_augment_flags_conflict() {
    rt_gaze()
        .args(["train", "--augment", "--no_augment"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_train_without_dataset_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    rt_gaze()
        .current_dir(temp_dir.path())
        .arg("train")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No dataset given"));
}

#[test]
fn test_train_missing_dataset_file_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    rt_gaze()
        .current_dir(temp_dir.path())
        .args(["train", "--hdf5_file", "/nonexistent/rt_gene.safetensors"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to open dataset"));
}

// === Infer ===

#[test]
fn test_infer_requires_paths() {
    let temp_dir = tempfile::tempdir().unwrap();
    rt_gaze()
        .current_dir(temp_dir.path())
        .args(["infer", "--checkpoint", "model.safetensors"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No paths specified"));
}

#[test]
fn test_infer_requires_checkpoint() {
    let temp_dir = tempfile::tempdir().unwrap();
    rt_gaze()
        .current_dir(temp_dir.path())
        .args(["infer", "frame.png"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No checkpoints given"));
}

#[test]
fn test_infer_min_face_score_validation() {
    rt_gaze()
        .args(["infer", "--min-face-score", "2.0", "frame.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("2 is not in 0.0..=1.0"));
}

#[test]
fn test_infer_max_yaw_validation() {
    rt_gaze()
        .args(["infer", "--max-yaw", "0", "frame.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive angle"));
}

#[test]
fn test_infer_rejects_out_of_range_input_size() {
    rt_gaze()
        .args(["infer", "--checkpoint", "a.safetensors", "--input-size", "0", "frame.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be between 1 and 4096"));
}

#[test]
fn test_infer_invalid_format() {
    rt_gaze()
        .args(["infer", "--format", "xml", "frame.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

// === Dataset ===

#[test]
fn test_dataset_info_missing_file() {
    rt_gaze()
        .args(["dataset", "info", "/nonexistent/data.safetensors"])
        .assert()
        .code(2)
        .stderr(predicate::str::starts_with("error:"));
}

// === Models ===

#[test]
fn test_models_path_honours_flag() {
    let temp_dir = tempfile::tempdir().unwrap();
    rt_gaze()
        .current_dir(temp_dir.path())
        .args(["models", "path", "--models-dir"])
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(
            temp_dir.path().to_string_lossy().as_ref(),
        ));
}

#[test]
fn test_models_fetch_requires_url() {
    let temp_dir = tempfile::tempdir().unwrap();
    rt_gaze()
        .current_dir(temp_dir.path())
        .env_remove("RT_GAZE_MODELS_URL")
        .args(["models", "fetch", "--models-dir"])
        .arg(temp_dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No download URL"));
}

#[test]
fn test_models_list_reports_missing() {
    let temp_dir = tempfile::tempdir().unwrap();
    rt_gaze()
        .current_dir(temp_dir.path())
        .args(["models", "list", "--models-dir"])
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0/2 models installed"));
}
