//! Recipient identity extractor.
//!
//! Lists the input directory and turns every `<candidate>.pdf` regular file
//! into a [`RawArtifact`]. Directories and other files are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ExtractError;
use crate::pipeline::types::RawArtifact;

/// Extension that marks a file as a document artifact.
pub const DOCUMENT_EXTENSION: &str = "pdf";

/// A verified, listable input directory.
///
/// Every call to [`list`](Self::list) reads the directory afresh.
#[derive(Debug, Clone)]
pub struct RawArtifacts {
    dir: PathBuf,
}

impl RawArtifacts {
    /// Open `dir` for listing. Fails if it does not exist or cannot be read.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let dir = dir.into();
        if !dir.exists() {
            return Err(ExtractError::DirectoryNotFound(dir));
        }
        if !dir.is_dir() {
            return Err(ExtractError::NotADirectory(dir));
        }
        if let Err(source) = fs::read_dir(&dir) {
            return Err(ExtractError::Unreadable { path: dir, source });
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The document artifacts currently in the directory.
    ///
    /// A listing is all or nothing: any read error fails the whole call.
    pub fn list(&self) -> Result<Vec<RawArtifact>, ExtractError> {
        let unreadable = |source: std::io::Error| ExtractError::Unreadable {
            path: self.dir.clone(),
            source,
        };

        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(unreadable)? {
            let path = entry.map_err(unreadable)?.path();
            if let Some(artifact) = to_artifact(&path) {
                artifacts.push(artifact);
            }
        }
        Ok(artifacts)
    }

    /// Candidate identity strings, one per document artifact.
    pub fn candidates(&self) -> Result<Vec<String>, ExtractError> {
        Ok(self.list()?.into_iter().map(|artifact| artifact.stem).collect())
    }
}

/// Map a path to an artifact if it is a regular `.pdf` file.
fn to_artifact(path: &Path) -> Option<RawArtifact> {
    if !path.is_file() {
        return None;
    }
    if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
        return None;
    }
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        debug!(path = %path.display(), "Skipping non UTF-8 filename");
        return None;
    };
    Some(RawArtifact {
        stem: stem.to_string(),
        path: path.to_path_buf(),
    })
}

/// Path of the raw document for a candidate identity inside `dir`.
pub fn document_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.{DOCUMENT_EXTENSION}"))
}
