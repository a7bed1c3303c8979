//! Helpers shared by the validator implementations.

use crate::core::context::ValidationContext;
use crate::core::error::GatekeeperError;
use crate::core::runners::RunnerOutput;
use crate::core::validator::ValidatorOutcome;
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use tiktoken_rs::cl100k_base;

/// The declared test file, located and read.
#[derive(Debug, Clone)]
pub struct TestFile {
    pub relative: String,
    pub absolute: PathBuf,
    pub content: String,
}

/// Resolve and read the run's test file. The `Err` side is the verdict to
/// report: FAILED when no test file is configured or it does not exist.
pub fn load_test_file(ctx: &ValidationContext) -> Result<Result<TestFile, ValidatorOutcome>, GatekeeperError> {
    let (Some(relative), Some(absolute)) = (ctx.test_file_relative(), ctx.test_file_absolute())
    else {
        return Ok(Err(ValidatorOutcome::fail("Test file path not configured for this run")));
    };
    if !absolute.is_file() {
        return Ok(Err(ValidatorOutcome::fail(format!(
            "Test file {} does not exist",
            relative
        ))
        .with_details(json!({ "testFile": relative }))));
    }
    let content = fs::read_to_string(&absolute).map_err(GatekeeperError::IoError)?;
    Ok(Ok(TestFile {
        relative,
        absolute,
        content,
    }))
}

pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Verdict for a runner invocation. `ok` decides pass/fail; the tool output
/// tail becomes evidence and its hash goes into `details`.
pub fn runner_outcome(
    output: &RunnerOutput,
    ok: bool,
    pass_message: impl Into<String>,
    fail_message: impl Into<String>,
) -> ValidatorOutcome {
    let details = json!({
        "exitCode": output.exit_code,
        "timedOut": output.timed_out,
        "durationMs": output.duration_ms,
        "errors": output.errors,
        "outputSha256": sha256_hex(&output.output),
    });
    let outcome = if ok {
        ValidatorOutcome::pass(pass_message)
    } else if output.timed_out {
        ValidatorOutcome::fail(format!("{} (timed out)", fail_message.into()))
    } else {
        ValidatorOutcome::fail(fail_message)
    };
    let outcome = outcome.with_details(details);
    if output.output.is_empty() {
        outcome
    } else {
        outcome.with_evidence(output.output.clone())
    }
}

pub fn count_tokens(text: &str) -> Result<usize, GatekeeperError> {
    let bpe = cl100k_base()
        .map_err(|e| GatekeeperError::ConfigError(format!("tokenizer unavailable: {}", e)))?;
    Ok(bpe.encode_with_special_tokens(text).len())
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "when", "then", "should",
    "must", "will", "have", "has", "are", "was", "were", "not", "but", "all", "any", "can",
    "add", "make", "use", "new", "its", "our", "your", "their", "which", "while", "also",
    "test", "tests", "file", "files", "expect", "describe", "const", "return", "import",
    "export", "true", "false", "null", "undefined", "async", "await", "function",
];

/// Lowercase words of 3+ letters, split on camelCase, minus stopwords.
pub fn keywords(text: &str) -> BTreeSet<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let re = WORD.get_or_init(|| Regex::new(r"[A-Z]+[a-z]*|[a-z]+").expect("valid word regex"));
    re.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Path-like tokens (`src/a/b.ts`, `Button.tsx`) mentioned in free text.
pub fn path_mentions(text: &str) -> Vec<String> {
    static PATH: OnceLock<Regex> = OnceLock::new();
    let re = PATH.get_or_init(|| {
        Regex::new(r"(?:[A-Za-z0-9_.\-]+/)*[A-Za-z0-9_\-]+\.(?:tsx?|jsx?|mjs|cjs|css|scss|json|vue|svelte)\b")
            .expect("valid path regex")
    });
    let mut seen = BTreeSet::new();
    re.find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runners::StructuredError;

    #[test]
    fn keywords_split_camel_case_and_drop_stopwords() {
        let words = keywords("Add a disabledState prop to the Button component");
        assert!(words.contains("disabled"));
        assert!(words.contains("state"));
        assert!(words.contains("button"));
        assert!(!words.contains("the"));
        assert!(!words.contains("add"));
    }

    #[test]
    fn finds_path_mentions() {
        let found = path_mentions("Update src/components/Button.tsx and utils.ts, not README.md");
        assert_eq!(
            found,
            vec!["src/components/Button.tsx".to_string(), "utils.ts".to_string()]
        );
    }

    #[test]
    fn runner_outcome_carries_errors_and_evidence() {
        let output = RunnerOutput {
            passed: false,
            exit_code: 2,
            timed_out: false,
            output: "src/a.ts(1,1): error TS1: bad".to_string(),
            errors: vec![StructuredError {
                file: Some("src/a.ts".to_string()),
                line: Some(1),
                column: Some(1),
                code: Some("TS1".to_string()),
                message: "bad".to_string(),
            }],
            duration_ms: 12,
        };
        let outcome = runner_outcome(&output, false, "ok", "Compilation failed");
        assert_eq!(outcome.message, "Compilation failed");
        assert_eq!(outcome.details["exitCode"], 2);
        assert_eq!(outcome.details["errors"][0]["file"], "src/a.ts");
        assert_eq!(outcome.details["outputSha256"].as_str().map(str::len), Some(64));
        assert!(outcome.evidence.is_some());
    }

    #[test]
    fn sha256_is_stable() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
