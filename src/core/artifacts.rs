//! Artifact store: generated plan/manifest/test files, keyed by `outputId`.
//!
//! The artifact folder is the durable copy of what the agent produced. The
//! working tree can lose a generated test file (stash, checkout, cleanup);
//! the store is where it gets healed from.

use crate::core::error::GatekeeperError;
use crate::core::patterns;
use std::fs;
use std::path::{Path, PathBuf};

pub trait ArtifactStore: Send + Sync {
    fn write(&self, output_id: &str, filename: &str, content: &str)
    -> Result<(), GatekeeperError>;

    /// `Ok(None)` when the artifact does not exist.
    fn read(&self, output_id: &str, filename: &str) -> Result<Option<String>, GatekeeperError>;

    /// Filesystem location of an artifact, when the store is file-backed.
    fn locate(&self, output_id: &str, filename: &str) -> Option<PathBuf>;
}

/// `<root>/<outputId>/<filename>` on disk.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, output_id: &str, filename: &str) -> Result<PathBuf, GatekeeperError> {
        if !patterns::is_contained(output_id) || output_id.contains('/') {
            return Err(GatekeeperError::PathError(format!(
                "invalid output id '{}'",
                output_id
            )));
        }
        if !patterns::is_contained(filename) {
            return Err(GatekeeperError::PathError(format!(
                "artifact filename '{}' escapes the artifact folder",
                filename
            )));
        }
        Ok(self
            .root
            .join(output_id)
            .join(patterns::normalize_slashes(filename)))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn write(
        &self,
        output_id: &str,
        filename: &str,
        content: &str,
    ) -> Result<(), GatekeeperError> {
        let path = self.artifact_path(output_id, filename)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(GatekeeperError::IoError)?;
        }
        fs::write(&path, content).map_err(GatekeeperError::IoError)
    }

    fn read(&self, output_id: &str, filename: &str) -> Result<Option<String>, GatekeeperError> {
        let path = self.artifact_path(output_id, filename)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GatekeeperError::IoError(e)),
        }
    }

    fn locate(&self, output_id: &str, filename: &str) -> Option<PathBuf> {
        self.artifact_path(output_id, filename)
            .ok()
            .filter(|p| p.is_file())
    }
}
