//! The declared change boundary produced by the upstream planner.

use crate::core::error::GatekeeperError;
use crate::core::patterns;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

impl FileAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FileAction::Create => "CREATE",
            FileAction::Modify => "MODIFY",
            FileAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FileAction {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(FileAction::Create),
            "MODIFY" => Ok(FileAction::Modify),
            "DELETE" => Ok(FileAction::Delete),
            other => Err(GatekeeperError::ValidationError(format!(
                "unknown manifest action '{}': expected CREATE, MODIFY or DELETE",
                other
            ))),
        }
    }
}

// Upstream planners are inconsistent about case; accept any.
impl<'de> Deserialize<'de> for FileAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub action: FileAction,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationManifest {
    pub files: Vec<ManifestEntry>,
    pub test_file: String,
}

impl ValidationManifest {
    /// Parse the upstream JSON document and normalize its paths.
    pub fn from_json(raw: &str) -> Result<Self, GatekeeperError> {
        let mut manifest: ValidationManifest = serde_json::from_str(raw).map_err(|e| {
            GatekeeperError::ValidationError(format!("invalid manifest JSON: {}", e))
        })?;
        manifest.normalize();
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String, GatekeeperError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn normalize(&mut self) {
        for entry in &mut self.files {
            entry.path = patterns::normalize_slashes(&entry.path);
        }
        self.test_file = patterns::normalize_slashes(&self.test_file);
    }

    /// Structural invariants: contained paths, and `testFile` declared as CREATE/MODIFY.
    pub fn validate(&self) -> Result<(), GatekeeperError> {
        if self.files.is_empty() {
            return Err(GatekeeperError::ValidationError(
                "manifest declares no files".to_string(),
            ));
        }
        for entry in &self.files {
            if !patterns::is_contained(&entry.path) {
                return Err(GatekeeperError::ValidationError(format!(
                    "manifest path '{}' must be relative to the project root",
                    entry.path
                )));
            }
        }
        let test_key = patterns::normalize_slashes(&self.test_file);
        let declared = self
            .files
            .iter()
            .find(|e| patterns::normalize_slashes(&e.path) == test_key);
        match declared {
            Some(entry) if entry.action != FileAction::Delete => Ok(()),
            Some(_) => Err(GatekeeperError::ValidationError(format!(
                "testFile '{}' is declared with action DELETE",
                self.test_file
            ))),
            None => Err(GatekeeperError::ValidationError(format!(
                "testFile '{}' is not listed in manifest files",
                self.test_file
            ))),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|e| e.path.as_str())
    }

    /// Slash-normalized lookup set of every declared path. Case is significant:
    /// git reports paths exactly as they exist in the tree.
    pub fn path_set(&self) -> FxHashSet<String> {
        self.files
            .iter()
            .map(|e| patterns::normalize_slashes(&e.path))
            .collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        let key = patterns::normalize_slashes(path);
        self.files
            .iter()
            .any(|e| patterns::normalize_slashes(&e.path) == key)
    }

    /// Paths in `touched` that the manifest does not declare, in input order.
    pub fn undeclared<'a, I>(&self, touched: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let declared = self.path_set();
        let mut seen = FxHashSet::default();
        touched
            .into_iter()
            .filter(|p| {
                let key = patterns::normalize_slashes(p);
                !declared.contains(&key) && seen.insert(key)
            })
            .cloned()
            .collect()
    }
}
