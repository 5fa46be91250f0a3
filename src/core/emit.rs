//! Emission of chunk files, the upload manifest, and the run's target map.
//!
//! Everything is serialized in memory first, so a serialization failure
//! leaves the output directory untouched. Every file is then staged next to
//! its destination and only renamed into place once all of them were written.
//! Stale chunks of an earlier run are removed last.

use super::codegen;
use super::error::{Error, Result};
use super::state::{self, TARGET_MAP_FILE};
use super::types::{Phase, PipelineChunk, Target};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// File name of the upload manifest within an output directory.
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Ordered list of chunk uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub chunks: Vec<ManifestEntry>,
}

/// One chunk upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub phase: Phase,
    pub index: usize,
    pub file: String,
    pub steps: usize,
    pub upload: String,
}

/// Write chunks, manifest and target map into `out_dir`.
pub fn emit(
    out_dir: &Path,
    chunks: &[PipelineChunk],
    targets: &[Target],
    upload_command: &str,
) -> Result<Manifest> {
    let mut files: Vec<(PathBuf, Vec<u8>)> = Vec::with_capacity(chunks.len() + 2);
    let mut manifest = Manifest { chunks: Vec::new() };

    for chunk in chunks {
        let file = chunk.file_name();
        let path = out_dir.join(&file);
        let json = serde_json::to_vec_pretty(chunk).map_err(|e| Error::Serialize(e.to_string()))?;
        manifest.chunks.push(ManifestEntry {
            phase: chunk.phase,
            index: chunk.index,
            file: file.clone(),
            steps: chunk.steps.len(),
            upload: codegen::upload_command(upload_command, &path.display().to_string())?,
        });
        files.push((path, json));
    }

    let yaml = serde_yaml_ng::to_string(&manifest).map_err(|e| Error::Serialize(e.to_string()))?;
    files.push((out_dir.join(MANIFEST_FILE), yaml.into_bytes()));

    let map = state::target_map(targets);
    let json = serde_json::to_vec_pretty(&map).map_err(|e| Error::Serialize(e.to_string()))?;
    files.push((out_dir.join(TARGET_MAP_FILE), json));

    std::fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;
    stage(&files)?;
    for (path, _) in &files {
        let tmp = state::temp_path(path);
        std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
        tracing::debug!(path = %path.display(), "wrote");
    }
    let current: HashSet<&str> = manifest.chunks.iter().map(|c| c.file.as_str()).collect();
    remove_stale_chunks(out_dir, &current)?;
    tracing::info!(
        out = %out_dir.display(),
        chunks = manifest.chunks.len(),
        targets = targets.len(),
        "emitted pipeline"
    );
    Ok(manifest)
}

/// Write every file to its staging path; on failure remove what was staged.
fn stage(files: &[(PathBuf, Vec<u8>)]) -> Result<()> {
    for (i, (path, contents)) in files.iter().enumerate() {
        let tmp = state::temp_path(path);
        if let Err(e) = std::fs::write(&tmp, contents) {
            for (staged, _) in &files[..i] {
                let _ = std::fs::remove_file(state::temp_path(staged));
            }
            return Err(Error::io(&tmp, e));
        }
    }
    Ok(())
}

/// Remove chunk files left by an earlier run.
fn remove_stale_chunks(out_dir: &Path, current: &HashSet<&str>) -> Result<()> {
    let entries = std::fs::read_dir(out_dir).map_err(|e| Error::io(out_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(out_dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_chunk_file(name) && !current.contains(name) {
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        }
    }
    Ok(())
}

fn is_chunk_file(name: &str) -> bool {
    Phase::ALL.iter().any(|phase| {
        name.strip_prefix(&format!("{}-chunk-", phase))
            .and_then(|rest| rest.strip_suffix(".json"))
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    })
}
