//! Compiler / linter / test-runner capability.
//!
//! Validators only see the `Runner` trait; the concrete `CommandRunner` shells out
//! to the project's own tooling and parses its output into `StructuredError`s.

use crate::core::config::{CommandSpec, GatekeeperConfig, ParserKind};
use crate::core::error::GatekeeperError;
use crate::core::output;
use crate::core::process::{self, ProcessOutput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const MAX_STRUCTURED_ERRORS: usize = 50;
const MAX_OUTPUT_CHARS: usize = 8_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerOutput {
    pub passed: bool,
    pub exit_code: i32,
    pub timed_out: bool,
    /// Tail of combined stdout/stderr.
    pub output: String,
    pub errors: Vec<StructuredError>,
    pub duration_ms: u64,
}

impl RunnerOutput {
    pub fn from_process(out: &ProcessOutput, parser: ParserKind) -> Self {
        let combined = out.combined();
        let mut errors = parse_errors(parser, &combined);
        if out.timed_out {
            errors.push(StructuredError {
                file: None,
                line: None,
                column: None,
                code: Some("TIMEOUT".to_string()),
                message: format!("timed out (exit {})", process::TIMEOUT_EXIT_CODE),
            });
        }
        Self {
            passed: out.success(),
            exit_code: out.exit_code,
            timed_out: out.timed_out,
            output: output::tail(&combined, MAX_OUTPUT_CHARS),
            errors,
            duration_ms: out.duration_ms,
        }
    }
}

pub trait Runner: Send + Sync {
    fn name(&self) -> &str;

    /// Run the tool in `cwd` with extra `args` appended to its configured ones.
    /// `Err` means the tool could not be run at all.
    fn run(&self, cwd: &Path, args: &[String]) -> Result<RunnerOutput, GatekeeperError>;
}

/// `Runner` backed by an external command from `.gatekeeper/config.toml`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    name: String,
    spec: CommandSpec,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(name: &str, spec: CommandSpec, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            spec,
            timeout,
        }
    }
}

impl Runner for CommandRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, cwd: &Path, args: &[String]) -> Result<RunnerOutput, GatekeeperError> {
        let mut full_args = self.spec.args.clone();
        full_args.extend(args.iter().cloned());
        let out = process::run_with_timeout(&self.spec.program, &full_args, cwd, self.timeout)?;
        Ok(RunnerOutput::from_process(&out, self.spec.parser))
    }
}

/// The project's tools. `None` means "not configured" for that capability.
#[derive(Clone, Default)]
pub struct Toolchain {
    pub compiler: Option<Arc<dyn Runner>>,
    pub linter: Option<Arc<dyn Runner>>,
    pub test_runner: Option<Arc<dyn Runner>>,
    pub build: Option<Arc<dyn Runner>>,
}

impl Toolchain {
    pub fn from_config(config: &GatekeeperConfig) -> Self {
        let make = |name: &str, spec: &Option<CommandSpec>| -> Option<Arc<dyn Runner>> {
            spec.as_ref().map(|s| {
                let timeout = Duration::from_secs(config.timeout_for(s));
                Arc::new(CommandRunner::new(name, s.clone(), timeout)) as Arc<dyn Runner>
            })
        };
        Self {
            compiler: make("compiler", &config.commands.compiler),
            linter: make("linter", &config.commands.linter),
            test_runner: make("test_runner", &config.commands.test_runner),
            build: make("build", &config.commands.build),
        }
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = |r: &Option<Arc<dyn Runner>>| r.as_ref().map(|r| r.name().to_string());
        f.debug_struct("Toolchain")
            .field("compiler", &name(&self.compiler))
            .field("linter", &name(&self.linter))
            .field("test_runner", &name(&self.test_runner))
            .field("build", &name(&self.build))
            .finish()
    }
}

pub fn parse_errors(parser: ParserKind, text: &str) -> Vec<StructuredError> {
    let mut errors = match parser {
        ParserKind::Tsc => parse_tsc(text),
        ParserKind::Eslint => parse_eslint(text),
        ParserKind::Jest => parse_jest(text),
        ParserKind::Generic => parse_generic(text),
    };
    errors.truncate(MAX_STRUCTURED_ERRORS);
    errors
}

fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| Regex::new(r"\x1B\[[0-9;]*[A-Za-z]").expect("valid ANSI regex"));
    re.replace_all(text, "").to_string()
}

/// `src/a.ts(3,7): error TS2322: msg` and `src/a.ts:3:7 - error TS2322: msg`.
fn parse_tsc(text: &str) -> Vec<StructuredError> {
    static PAREN: OnceLock<Regex> = OnceLock::new();
    static COLON: OnceLock<Regex> = OnceLock::new();
    let paren = PAREN.get_or_init(|| {
        Regex::new(r"^(.+?)\((\d+),(\d+)\):\s+error\s+(TS\d+):\s+(.+)$").expect("valid tsc regex")
    });
    let colon = COLON.get_or_init(|| {
        Regex::new(r"^(.+?):(\d+):(\d+)\s+-\s+error\s+(TS\d+):\s+(.+)$").expect("valid tsc regex")
    });
    strip_ansi(text)
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let caps = paren.captures(line).or_else(|| colon.captures(line))?;
            Some(StructuredError {
                file: Some(caps[1].replace('\\', "/")),
                line: caps[2].parse().ok(),
                column: caps[3].parse().ok(),
                code: Some(caps[4].to_string()),
                message: caps[5].trim().to_string(),
            })
        })
        .collect()
}

/// ESLint `unix` formatter: `path:line:col: message [Error/rule]`.
fn parse_eslint(text: &str) -> Vec<StructuredError> {
    static UNIX: OnceLock<Regex> = OnceLock::new();
    let re = UNIX.get_or_init(|| {
        Regex::new(r"^(.+?):(\d+):(\d+):\s+(.+?)(?:\s+\[(Error|Warning)/([^\]]+)\])?$")
            .expect("valid eslint regex")
    });
    strip_ansi(text)
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim())?;
            if caps.get(5).map(|m| m.as_str()) == Some("Warning") {
                return None;
            }
            Some(StructuredError {
                file: Some(caps[1].replace('\\', "/")),
                line: caps[2].parse().ok(),
                column: caps[3].parse().ok(),
                code: caps.get(6).map(|m| m.as_str().to_string()),
                message: caps[4].trim().to_string(),
            })
        })
        .collect()
}

/// Jest / Vitest: `FAIL path` suite lines and `●`/`×`/`✕` failed test lines.
fn parse_jest(text: &str) -> Vec<StructuredError> {
    static FAIL: OnceLock<Regex> = OnceLock::new();
    static TEST: OnceLock<Regex> = OnceLock::new();
    let fail = FAIL.get_or_init(|| Regex::new(r"^FAIL\s+(\S+)").expect("valid jest regex"));
    let test = TEST.get_or_init(|| Regex::new(r"^(?:●|×|✕)\s+(.+)$").expect("valid jest regex"));
    let mut current_file: Option<String> = None;
    let mut out = Vec::new();
    for line in strip_ansi(text).lines() {
        let line = line.trim();
        if let Some(caps) = fail.captures(line) {
            let file = caps[1].replace('\\', "/");
            current_file = Some(file.clone());
            out.push(StructuredError {
                file: Some(file),
                line: None,
                column: None,
                code: Some("SUITE_FAILED".to_string()),
                message: line.to_string(),
            });
        } else if let Some(caps) = test.captures(line) {
            out.push(StructuredError {
                file: current_file.clone(),
                line: None,
                column: None,
                code: Some("TEST_FAILED".to_string()),
                message: caps[1].trim().to_string(),
            });
        }
    }
    out
}

fn parse_generic(text: &str) -> Vec<StructuredError> {
    strip_ansi(text)
        .lines()
        .map(str::trim)
        .filter(|line| line.to_lowercase().contains("error"))
        .map(|line| StructuredError {
            file: None,
            line: None,
            column: None,
            code: None,
            message: line.to_string(),
        })
        .collect()
}
