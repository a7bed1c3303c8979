//! Per-project configuration loaded from `.gatekeeper/config.toml`.
//!
//! Every field has a default, so a project without a config file still gets a
//! usable pipeline (TypeScript toolchain via `npx`, conventional test paths).

use crate::core::error::GatekeeperError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".gatekeeper";
pub const CONFIG_FILE: &str = "config.toml";
pub const DATA_DIR: &str = "data";
pub const HOME_ENV: &str = "GATEKEEPER_HOME";

/// How a runner's output is turned into structured errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    Tsc,
    Eslint,
    Jest,
    #[default]
    Generic,
}

/// A single external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub parser: ParserKind,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str], parser: ParserKind) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: None,
            parser,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub compiler: Option<CommandSpec>,
    pub linter: Option<CommandSpec>,
    pub test_runner: Option<CommandSpec>,
    pub build: Option<CommandSpec>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            compiler: Some(CommandSpec::new(
                "npx",
                &["tsc", "--noEmit", "--pretty", "false"],
                ParserKind::Tsc,
            )),
            linter: Some(CommandSpec::new(
                "npx",
                &["eslint", "--format", "unix"],
                ParserKind::Eslint,
            )),
            test_runner: Some(CommandSpec::new("npx", &["vitest", "run"], ParserKind::Jest)),
            build: Some(CommandSpec::new("npm", &["run", "build"], ParserKind::Generic)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum cl100k tokens for prompt + touched file contents.
    pub token_budget: usize,
    /// Manifests above this size get a scope warning.
    pub max_manifest_files: usize,
    /// Applied to any command without its own `timeout_secs`.
    pub default_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            token_budget: 100_000,
            max_manifest_files: 15,
            default_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Artifact store root, relative to the project root unless absolute.
    pub artifacts_dir: String,
    /// Where disposable worktrees are created, relative to the project root unless absolute.
    pub worktrees_dir: String,
    /// Untracked project directories (installed dependencies) linked into each
    /// disposable worktree so tools resolve there as they do in the project.
    pub worktree_links: Vec<String>,
    pub sensitive_paths: Vec<String>,
    pub test_patterns: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: ".gatekeeper/artifacts".to_string(),
            worktrees_dir: ".gatekeeper/worktrees".to_string(),
            worktree_links: vec!["node_modules".to_string()],
            sensitive_paths: vec![
                ".env".to_string(),
                ".env.*".to_string(),
                "**/secrets/**".to_string(),
                "**/.credentials".to_string(),
                "**/*.pem".to_string(),
                "**/*.key".to_string(),
            ],
            test_patterns: vec![
                "**/*.spec.*".to_string(),
                "**/*.test.*".to_string(),
                "**/__tests__/**".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub commands: CommandsConfig,
    pub limits: LimitsConfig,
    pub paths: PathsConfig,
    /// Test type (`component`, `hook`, ...) to path pattern containing `{name}`.
    pub conventions: BTreeMap<String, String>,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        let mut conventions = BTreeMap::new();
        conventions.insert(
            "layout".to_string(),
            "src/layout/__tests__/{name}.spec.tsx".to_string(),
        );
        conventions.insert(
            "component".to_string(),
            "src/components/__tests__/{name}.spec.tsx".to_string(),
        );
        conventions.insert(
            "hook".to_string(),
            "src/hooks/__tests__/{name}.spec.ts".to_string(),
        );
        conventions.insert(
            "widget".to_string(),
            "src/widgets/__tests__/{name}.spec.tsx".to_string(),
        );
        conventions.insert(
            "lib".to_string(),
            "src/lib/__tests__/{name}.spec.ts".to_string(),
        );
        Self {
            commands: CommandsConfig::default(),
            limits: LimitsConfig::default(),
            paths: PathsConfig::default(),
            conventions,
        }
    }
}

impl GatekeeperConfig {
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load `.gatekeeper/config.toml`. No config = defaults (not an error).
    pub fn load(project_root: &Path) -> Result<Self, GatekeeperError> {
        let path = Self::config_path(project_root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(GatekeeperError::IoError)?;
        Self::parse(&content)
            .map_err(|e| GatekeeperError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self, GatekeeperError> {
        toml::from_str(content).map_err(|e| GatekeeperError::ConfigError(e.to_string()))
    }

    pub fn timeout_for(&self, spec: &CommandSpec) -> u64 {
        spec.timeout_secs.unwrap_or(self.limits.default_timeout_secs)
    }

    pub fn artifacts_root(&self, project_root: &Path) -> PathBuf {
        resolve_under(project_root, &self.paths.artifacts_dir)
    }

    pub fn worktrees_root(&self, project_root: &Path) -> PathBuf {
        resolve_under(project_root, &self.paths.worktrees_dir)
    }
}

/// Data directory holding `runs.db` and the audit log.
/// `GATEKEEPER_HOME` overrides the project-local default.
pub fn data_dir(project_root: &Path) -> PathBuf {
    match std::env::var(HOME_ENV) {
        Ok(home) if !home.trim().is_empty() => PathBuf::from(home).join(DATA_DIR),
        _ => project_root.join(CONFIG_DIR).join(DATA_DIR),
    }
}

fn resolve_under(project_root: &Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    if p.is_absolute() { p } else { project_root.join(p) }
}
