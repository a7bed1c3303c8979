//! Files embedded in the binary and the `init` scaffolding that writes them.

use crate::core::config::{CONFIG_DIR, GatekeeperConfig};
use crate::core::error::GatekeeperError;
use rust_embed::RustEmbed;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.toml"]
struct Templates;

/// Entries `init` adds to the project's `.gitignore`.
pub const GITIGNORE_ENTRIES: &[&str] = &[
    ".gatekeeper/data/",
    ".gatekeeper/worktrees/",
    ".gatekeeper/artifacts/",
];

pub fn template(name: &str) -> Option<String> {
    Templates::get(name).map(|file| String::from_utf8_lossy(&file.data).into_owned())
}

pub fn default_config_template() -> Result<String, GatekeeperError> {
    template("config.toml")
        .ok_or_else(|| GatekeeperError::NotFound("embedded template config.toml".to_string()))
}

/// What `init_project` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub config_written: bool,
    pub gitignore_entries_added: Vec<String>,
}

/// Write `.gatekeeper/config.toml` (unless present and not `force`) and make
/// sure gatekeeper's generated state is git-ignored.
pub fn init_project(project_root: &Path, force: bool) -> Result<InitReport, GatekeeperError> {
    let config_path = GatekeeperConfig::config_path(project_root);
    fs::create_dir_all(project_root.join(CONFIG_DIR)).map_err(GatekeeperError::IoError)?;

    let config_written = force || !config_path.exists();
    if config_written {
        fs::write(&config_path, default_config_template()?).map_err(GatekeeperError::IoError)?;
    }

    let gitignore = project_root.join(".gitignore");
    let existing = match fs::read_to_string(&gitignore) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(GatekeeperError::IoError(e)),
    };
    let present: Vec<&str> = existing.lines().map(str::trim).collect();
    let missing: Vec<String> = GITIGNORE_ENTRIES
        .iter()
        .filter(|e| !present.contains(e))
        .map(|e| e.to_string())
        .collect();
    if !missing.is_empty() {
        let mut updated = existing.clone();
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        for entry in &missing {
            updated.push_str(entry);
            updated.push('\n');
        }
        fs::write(&gitignore, updated).map_err(GatekeeperError::IoError)?;
    }

    Ok(InitReport {
        config_path,
        config_written,
        gitignore_entries_added: missing,
    })
}
