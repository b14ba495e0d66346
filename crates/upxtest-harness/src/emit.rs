//! Seed table export.
//!
//! Writes `data01.h`..`data03.h` in the layout the packer test sources
//! `#include`, plus an `artifact_index.json` carrying the SHA-256 of each
//! file so a later run can prove the tables it compiled against.

use std::path::{Path, PathBuf};

use sha2::Digest;
use thiserror::Error;
use upxtest_core::{GenerationSet, SeedTables, seed::render_c_table};

use crate::structured_log::{ArtifactEntry, ArtifactIndex};

pub const INDEX_FILE: &str = "artifact_index.json";
pub const ARTIFACT_KIND: &str = "seed_table";

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed writing '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed reading '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact index is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{count} artifact(s) do not match their recorded sha256")]
    Mismatch { count: usize },
}

/// A hash that did not match on re-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMismatch {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

#[must_use]
pub fn header_file_name(set: GenerationSet) -> String {
    format!("{}.h", set.label())
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex_lower(&sha2::Sha256::digest(data))
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), EmitError> {
    std::fs::write(path, contents).map_err(|source| EmitError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Write one header per generation set and the index into `dir`
/// (created if missing). Returns the index that was written.
pub fn emit_seed_headers(
    seeds: &SeedTables,
    dir: &Path,
    run_id: &str,
) -> Result<ArtifactIndex, EmitError> {
    std::fs::create_dir_all(dir).map_err(|source| EmitError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut index = ArtifactIndex::new(run_id, crate::RUN_LABEL);
    for set in GenerationSet::ALL {
        let name = header_file_name(set);
        let text = render_c_table(seeds.table(set));
        write_file(&dir.join(&name), text.as_bytes())?;
        index.push(ArtifactEntry {
            path: name,
            kind: ARTIFACT_KIND.to_string(),
            sha256: sha256_hex(text.as_bytes()),
            size_bytes: Some(text.len() as u64),
            description: Some(format!("{set} seed table")),
        });
    }

    let json = index.to_json()?;
    write_file(&dir.join(INDEX_FILE), json.as_bytes())?;
    Ok(index)
}

/// Re-hash every artifact listed in `dir/artifact_index.json`.
pub fn verify_artifact_index(dir: &Path) -> Result<Vec<ArtifactMismatch>, EmitError> {
    let index_path = dir.join(INDEX_FILE);
    let read = |path: &Path| {
        std::fs::read(path).map_err(|source| EmitError::Read {
            path: path.to_path_buf(),
            source,
        })
    };
    let index: ArtifactIndex = serde_json::from_slice(&read(&index_path)?)?;

    let mut mismatches = Vec::new();
    for artifact in &index.artifacts {
        let actual = sha256_hex(&read(&dir.join(&artifact.path))?);
        if !actual.eq_ignore_ascii_case(&artifact.sha256) {
            mismatches.push(ArtifactMismatch {
                path: artifact.path.clone(),
                expected: artifact.sha256.clone(),
                actual,
            });
        }
    }
    Ok(mismatches)
}
