//! Manifest writer for LesionScope model directories.
//!
//! Hashes the model file(s) and the preprocessing artifact into
//! `manifest.json`, which the server checks before loading anything.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin write_manifest -- <model_dir> [--force]
//! ```

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use lesionscope::adapters::tract::{ModelManifest, MANIFEST_FILE, MODEL_CANDIDATES};

const ARTIFACT_FILE: &str = "preprocess_artifacts.json";

fn usage() -> String {
    "Usage: write_manifest <model_dir> [--force]".to_string()
}

fn parse_args() -> Result<(PathBuf, bool)> {
    let mut model_dir: Option<PathBuf> = None;
    let mut force = false;

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--force" => force = true,
            "-h" | "--help" => bail!(usage()),
            _ if model_dir.is_none() => model_dir = Some(PathBuf::from(arg)),
            _ => bail!(usage()),
        }
    }

    let model_dir = model_dir.with_context(usage)?;
    Ok((model_dir, force))
}

fn main() -> Result<()> {
    let (model_dir, force) = parse_args()?;

    // Accept a path to the model file itself.
    let model_dir = if model_dir.is_file() {
        model_dir
            .parent()
            .context("Model path has no parent directory")?
            .to_path_buf()
    } else {
        model_dir
    };

    let manifest_path = model_dir.join(MANIFEST_FILE);
    if manifest_path.exists() && !force {
        bail!("Refusing to overwrite existing {manifest_path:?}. Use --force.");
    }

    let mut names: Vec<&str> = MODEL_CANDIDATES.to_vec();
    names.push(ARTIFACT_FILE);

    let manifest = ModelManifest::build(&model_dir, &names, chrono::Utc::now().timestamp())
        .with_context(|| format!("Failed to hash files in {model_dir:?}"))?;

    if !MODEL_CANDIDATES
        .iter()
        .any(|name| manifest.files.contains_key(*name))
    {
        bail!(
            "No model found in {model_dir:?} (expected one of: {})",
            MODEL_CANDIDATES.join(", ")
        );
    }

    let bytes = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;
    fs::write(&manifest_path, bytes)
        .with_context(|| format!("Failed to write {manifest_path:?}"))?;

    println!("Wrote manifest: {manifest_path:?}");
    for (name, digest) in &manifest.files {
        println!("  {name}  sha256={digest}");
    }

    Ok(())
}
