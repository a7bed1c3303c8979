//! The read-only bundle every validator evaluates against.

use crate::core::artifacts::{ArtifactStore, FsArtifactStore};
use crate::core::config::GatekeeperConfig;
use crate::core::git::{GitOps, GitWorktreeService};
use crate::core::manifest::ValidationManifest;
use crate::core::paths::PathResolverService;
use crate::core::patterns;
use crate::core::runners::Toolchain;
use crate::core::validator::ValidatorCode;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Service handles validators may call out to.
#[derive(Clone)]
pub struct Services {
    pub toolchain: Toolchain,
    pub git: Arc<dyn GitOps>,
    pub paths: Arc<PathResolverService>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl Services {
    /// Real services for `project_root` as configured.
    pub fn from_config(project_root: &Path, config: &GatekeeperConfig) -> Self {
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::new(config.artifacts_root(project_root)));
        let git = GitWorktreeService::new(
            Some(config.worktrees_root(project_root)),
            Duration::from_secs(config.limits.default_timeout_secs),
        );
        Self {
            toolchain: Toolchain::from_config(config),
            git: Arc::new(git),
            paths: Arc::new(PathResolverService::new(
                config.conventions.clone(),
                artifacts.clone(),
            )),
            artifacts,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("toolchain", &self.toolchain)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub project_path: PathBuf,
    pub task_prompt: String,
    /// As recorded on the run: project-relative or absolute.
    pub test_file_path: Option<String>,
    pub manifest: ValidationManifest,
    pub bypassed_validators: BTreeSet<ValidatorCode>,
    pub base_ref: String,
    pub target_ref: String,
    pub output_id: Option<String>,
    pub config: GatekeeperConfig,
    pub services: Services,
}

impl ValidationContext {
    pub fn is_bypassed(&self, code: ValidatorCode) -> bool {
        self.bypassed_validators.contains(&code)
    }

    /// Test file path relative to the project root, slash-normalized.
    pub fn test_file_relative(&self) -> Option<String> {
        self.test_file_path
            .as_deref()
            .map(|p| patterns::relative_to_root(Path::new(p), &self.project_path))
    }

    pub fn test_file_absolute(&self) -> Option<PathBuf> {
        self.test_file_path.as_deref().map(|p| {
            let path = Path::new(p);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.project_path.join(path)
            }
        })
    }

    /// Absolute path of a manifest entry.
    pub fn project_file(&self, relative: &str) -> PathBuf {
        self.project_path.join(patterns::normalize_slashes(relative))
    }
}
