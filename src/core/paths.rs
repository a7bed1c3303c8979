//! Test-file classification, canonical placement and self-healing.

use crate::core::artifacts::ArtifactStore;
use crate::core::error::GatekeeperError;
use crate::core::manifest::ValidationManifest;
use crate::core::patterns;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Layout,
    Component,
    Hook,
    Widget,
    Lib,
}

impl TestType {
    /// Detection priority, highest first.
    pub const PRIORITY: [TestType; 5] = [
        TestType::Layout,
        TestType::Component,
        TestType::Hook,
        TestType::Widget,
        TestType::Lib,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Layout => "layout",
            TestType::Component => "component",
            TestType::Hook => "hook",
            TestType::Widget => "widget",
            TestType::Lib => "lib",
        }
    }

    fn dir_signal(self) -> &'static str {
        match self {
            TestType::Layout => "layout",
            TestType::Component => "components",
            TestType::Hook => "hooks",
            TestType::Widget => "widgets",
            TestType::Lib => "lib",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathResolution {
    Resolved {
        test_type: TestType,
        /// Project-relative canonical path.
        path: String,
        /// True when the artifact was copied into place by this call.
        copied: bool,
    },
    NoConvention(TestType),
}

/// Classify a manifest by directory signals. Never fails: no signal means `Component`.
pub fn detect_test_type(manifest: &ValidationManifest) -> TestType {
    let paths: Vec<String> = manifest
        .paths()
        .map(|p| format!("/{}", patterns::normalize_for_compare(p)))
        .collect();
    TestType::PRIORITY
        .into_iter()
        .find(|ty| {
            let needle = format!("/{}/", ty.dir_signal());
            paths.iter().any(|p| p.contains(&needle))
        })
        .unwrap_or(TestType::Component)
}

/// `Button.spec.tsx` -> `Button`, `format.test.ts` -> `format`, `util.ts` -> `util`.
pub fn test_base_name(test_path: &str) -> String {
    let normalized = patterns::normalize_slashes(test_path);
    let file = normalized.rsplit('/').next().unwrap_or_default();
    let lower = file.to_lowercase();
    for marker in [".spec.", ".test."] {
        if let Some(idx) = lower.find(marker) {
            return file[..idx].to_string();
        }
    }
    match file.rfind('.') {
        Some(idx) if idx > 0 => file[..idx].to_string(),
        _ => file.to_string(),
    }
}

/// Keep `target` if it exists; otherwise restore it from `artifact`.
/// Existing targets are never overwritten.
pub fn recheck_and_copy(target: &Path, artifact: &Path) -> Result<PathBuf, GatekeeperError> {
    if target.exists() {
        return Ok(target.to_path_buf());
    }
    if !artifact.is_file() {
        return Err(GatekeeperError::NotFound(format!(
            "artifact {} missing; cannot restore {}",
            artifact.display(),
            target.display()
        )));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(GatekeeperError::IoError)?;
    }
    fs::copy(artifact, target).map_err(GatekeeperError::IoError)?;
    info!(target = %target.display(), artifact = %artifact.display(), "restored test file from artifact");
    Ok(target.to_path_buf())
}

pub struct PathResolverService {
    conventions: BTreeMap<String, String>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl PathResolverService {
    pub fn new(conventions: BTreeMap<String, String>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            conventions,
            artifacts,
        }
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn detect_test_type(&self, manifest: &ValidationManifest) -> TestType {
        detect_test_type(manifest)
    }

    /// Canonical project-relative path for `test_file`, if a convention exists for the type.
    pub fn canonical_path(&self, test_type: TestType, test_file: &str) -> Option<String> {
        self.conventions
            .get(test_type.as_str())
            .map(|pattern| pattern.replace("{name}", &test_base_name(test_file)))
            .map(|p| patterns::normalize_slashes(&p))
    }

    /// Place the artifact test file at its conventional location under `project_root`.
    pub fn ensure_correct_path(
        &self,
        artifact_test_path: &Path,
        manifest: &ValidationManifest,
        project_root: &Path,
        output_id: &str,
    ) -> Result<PathResolution, GatekeeperError> {
        let test_type = self.detect_test_type(manifest);
        let file_name = artifact_test_path.to_string_lossy().to_string();
        let Some(canonical) = self.canonical_path(test_type, &file_name) else {
            debug!(test_type = %test_type, "no path convention");
            return Ok(PathResolution::NoConvention(test_type));
        };
        let target = project_root.join(&canonical);
        let existed = target.exists();
        if artifact_test_path.is_file() {
            recheck_and_copy(&target, artifact_test_path)?;
        } else {
            let name = artifact_test_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.heal_from_store(&target, output_id, &name)?;
        }
        Ok(PathResolution::Resolved {
            test_type,
            path: canonical,
            copied: !existed,
        })
    }

    /// `recheck_and_copy` with the artifact read through the store.
    pub fn heal_from_store(
        &self,
        target: &Path,
        output_id: &str,
        filename: &str,
    ) -> Result<PathBuf, GatekeeperError> {
        if target.exists() {
            return Ok(target.to_path_buf());
        }
        let content = self.artifacts.read(output_id, filename)?.ok_or_else(|| {
            GatekeeperError::NotFound(format!(
                "artifact {}/{} missing; cannot restore {}",
                output_id,
                filename,
                target.display()
            ))
        })?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(GatekeeperError::IoError)?;
        }
        fs::write(target, content).map_err(GatekeeperError::IoError)?;
        info!(target = %target.display(), output_id, filename, "restored test file from artifact store");
        Ok(target.to_path_buf())
    }

    /// Heal `test_file` (project-relative) from the store, trying the full
    /// relative path as the artifact key first, then the bare file name.
    pub fn heal_test_file(
        &self,
        project_root: &Path,
        test_file: &str,
        output_id: &str,
    ) -> Result<PathBuf, GatekeeperError> {
        let relative = patterns::relative_to_root(Path::new(test_file), project_root);
        let target = project_root.join(&relative);
        if target.exists() {
            return Ok(target);
        }
        match self.heal_from_store(&target, output_id, &relative) {
            Err(GatekeeperError::NotFound(_)) => {
                let name = relative.rsplit('/').next().unwrap_or(&relative).to_string();
                self.heal_from_store(&target, output_id, &name)
            }
            other => other,
        }
    }
}
