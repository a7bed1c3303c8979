//! Gate 1: is the test a real contract for the task?

use crate::core::context::ValidationContext;
use crate::core::error::GatekeeperError;
use crate::core::git::WorktreeGuard;
use crate::core::patterns;
use crate::core::validator::{Validator, ValidatorCode, ValidatorOutcome};
use crate::validators::support::{self, TestFile};
use regex::Regex;
use serde_json::json;
use std::fs;
use std::sync::OnceLock;
use tracing::debug;

macro_rules! test_file_or_verdict {
    ($ctx:expr) => {
        match support::load_test_file($ctx)? {
            Ok(file) => file,
            Err(verdict) => return Ok(verdict),
        }
    };
}

pub struct TestSyntaxValid;

impl Validator for TestSyntaxValid {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TestSyntaxValid
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let file = test_file_or_verdict!(ctx);
        let Some(compiler) = &ctx.services.toolchain.compiler else {
            return Ok(ValidatorOutcome::skip("No compiler configured"));
        };
        let output = compiler.run(&ctx.project_path, &[file.relative.clone()])?;
        Ok(support::runner_outcome(
            &output,
            output.passed,
            format!("{} compiles", file.relative),
            format!("{} has {} compile error(s)", file.relative, output.errors.len()),
        ))
    }
}

fn assertion_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bexpect\s*\(|\bassert(?:\.\w+)?\s*\(|\.should\b|\bexpectTypeOf\s*\(")
            .expect("valid assertion regex")
    })
}

pub struct TestHasAssertions;

impl Validator for TestHasAssertions {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TestHasAssertions
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let file = test_file_or_verdict!(ctx);
        let count = assertion_regex().find_iter(&file.content).count();
        if count == 0 {
            return Ok(ValidatorOutcome::fail(format!(
                "{} contains no assertions",
                file.relative
            )));
        }
        Ok(ValidatorOutcome::pass(format!("{} assertion(s) found", count))
            .with_details(json!({ "assertions": count })))
    }
}

/// Titles of `it(...)`/`test(...)` cases.
fn test_titles(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"\b(?:it|test)(?:\.\w+)?\s*\(\s*(?:'([^']*)'|"([^"]*)"|`([^`]*)`)"#)
            .expect("valid test title regex")
    });
    re.captures_iter(content)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn is_sad_title(title: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:error|errors|fail|fails|failure|invalid|reject|rejects|throw|throws|missing|empty|null|undefined|not|no|without|disabled|edge|wrong|bad|denied|unauthori[sz]ed)\b",
        )
        .expect("valid sad path regex")
    });
    re.is_match(title)
}

pub struct TestCoversHappyAndSadPath;

impl Validator for TestCoversHappyAndSadPath {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TestCoversHappyAndSadPath
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let file = test_file_or_verdict!(ctx);
        let titles = test_titles(&file.content);
        let sad_in_body = file.content.contains("toThrow") || file.content.contains(".rejects");
        let happy = titles.iter().any(|t| !is_sad_title(t));
        let sad = sad_in_body || titles.iter().any(|t| is_sad_title(t));
        let details = json!({ "tests": titles, "happyPath": happy, "sadPath": sad });
        match (happy, sad) {
            (true, true) => Ok(ValidatorOutcome::pass("Covers success and failure paths")
                .with_details(details)),
            (false, _) => Ok(ValidatorOutcome::warn("No success-path test case found")
                .with_details(details)),
            (_, false) => Ok(ValidatorOutcome::warn("No error-path test case found")
                .with_details(details)),
        }
    }
}

pub struct TestFailsBeforeImplementation;

impl Validator for TestFailsBeforeImplementation {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TestFailsBeforeImplementation
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let file = test_file_or_verdict!(ctx);
        let Some(runner) = &ctx.services.toolchain.test_runner else {
            return Ok(ValidatorOutcome::fail(
                "No test runner configured; cannot prove the test fails before implementation",
            ));
        };
        if !patterns::is_contained(&file.relative) {
            return Err(GatekeeperError::PathError(format!(
                "test file {} is outside the project",
                file.relative
            )));
        }

        let worktree = WorktreeGuard::create(
            ctx.services.git.as_ref(),
            &ctx.project_path,
            &ctx.base_ref,
        )?;
        worktree.link_from_project(&ctx.config.paths.worktree_links)?;
        let dest = worktree.path().join(&file.relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(GatekeeperError::IoError)?;
        }
        fs::copy(&file.absolute, &dest).map_err(GatekeeperError::IoError)?;
        debug!(worktree = %worktree.path().display(), test = %file.relative, "running test at base ref");
        let output = runner.run(worktree.path(), &[file.relative.clone()])?;
        drop(worktree);

        red_verdict(&file, &ctx.base_ref, &output)
    }
}

fn red_verdict(
    file: &TestFile,
    base_ref: &str,
    output: &crate::core::runners::RunnerOutput,
) -> Result<ValidatorOutcome, GatekeeperError> {
    let outcome = if output.timed_out {
        support::runner_outcome(
            output,
            false,
            "",
            format!("{} did not finish at {}", file.relative, base_ref),
        )
    } else if output.passed {
        support::runner_outcome(
            output,
            false,
            "",
            format!(
                "Test does not discriminate implementation absence: {} passes at {}",
                file.relative, base_ref
            ),
        )
    } else {
        support::runner_outcome(
            output,
            true,
            format!("{} fails at {} as expected", file.relative, base_ref),
            "",
        )
    };
    Ok(outcome)
}

pub struct NoDecorativeTests;

fn empty_test_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\b(?:it|test)\s*\(\s*(?:'[^']*'|"[^"]*"|`[^`]*`)\s*,\s*(?:async\s*)?(?:\(\s*\)\s*=>|function\s*\(\s*\))\s*\{\s*\}"#,
        )
        .expect("valid empty test regex")
    })
}

fn tautology_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"expect\(\s*([^()]+?)\s*\)\s*\.\s*(?:toBe|toEqual|toStrictEqual)\(\s*([^()]+?)\s*\)",
        )
        .expect("valid tautology regex")
    })
}

fn truthy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"expect\(\s*(?:true|1)\s*\)\s*\.\s*toBeTruthy\(\s*\)|expect\(\s*(?:false|0|null)\s*\)\s*\.\s*toBeFalsy\(\s*\)")
            .expect("valid truthy regex")
    })
}

fn is_literal(expr: &str) -> bool {
    let e = expr.trim();
    matches!(e, "true" | "false" | "null" | "undefined")
        || e.parse::<f64>().is_ok()
        || (e.len() >= 2
            && ((e.starts_with('\'') && e.ends_with('\''))
                || (e.starts_with('"') && e.ends_with('"'))
                || (e.starts_with('`') && e.ends_with('`'))))
}

/// Empty test bodies and assertions comparing a literal with itself.
pub fn decorative_findings(content: &str) -> Vec<String> {
    let mut findings: Vec<String> = empty_test_regex()
        .find_iter(content)
        .map(|m| format!("empty test: {}", m.as_str()))
        .collect();
    for caps in tautology_regex().captures_iter(content) {
        if caps[1].trim() == caps[2].trim() && is_literal(&caps[1]) {
            findings.push(format!("tautology: {}", &caps[0]));
        }
    }
    findings.extend(
        truthy_regex()
            .find_iter(content)
            .map(|m| format!("tautology: {}", m.as_str())),
    );
    findings
}

impl Validator for NoDecorativeTests {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::NoDecorativeTests
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let file = test_file_or_verdict!(ctx);
        let findings = decorative_findings(&file.content);
        if findings.is_empty() {
            return Ok(ValidatorOutcome::pass("No decorative tests"));
        }
        Ok(ValidatorOutcome::fail(format!(
            "{} decorative test construct(s) in {}",
            findings.len(),
            file.relative
        ))
        .with_details(json!({ "findings": findings })))
    }
}

pub struct ManifestFileLock;

impl Validator for ManifestFileLock {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::ManifestFileLock
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let diff = ctx
            .services
            .git
            .diff_files(&ctx.project_path, &ctx.base_ref, &ctx.target_ref)?;
        let undeclared = ctx.manifest.undeclared(&diff);
        let details = json!({
            "baseRef": ctx.base_ref,
            "targetRef": ctx.target_ref,
            "changedFiles": diff,
            "undeclaredFiles": undeclared,
        });
        if undeclared.is_empty() {
            return Ok(ValidatorOutcome::pass(format!(
                "All {} changed file(s) are declared",
                diff.len()
            ))
            .with_details(details));
        }
        Ok(ValidatorOutcome::fail(format!(
            "{} file(s) changed between {} and {} are not in the manifest",
            undeclared.len(),
            ctx.base_ref,
            ctx.target_ref
        ))
        .with_details(details))
    }
}

pub struct NoImplicitFiles;

impl Validator for NoImplicitFiles {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::NoImplicitFiles
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let declared: Vec<String> = ctx.manifest.paths().map(patterns::normalize_for_compare).collect();
        let implicit: Vec<String> = support::path_mentions(&ctx.task_prompt)
            .into_iter()
            .filter(|mention| {
                let m = patterns::normalize_for_compare(mention);
                !declared
                    .iter()
                    .any(|d| *d == m || d.ends_with(&format!("/{}", m)))
            })
            .collect();
        if implicit.is_empty() {
            return Ok(ValidatorOutcome::pass("Every file named in the prompt is declared"));
        }
        Ok(ValidatorOutcome::warn(format!(
            "Prompt mentions {} file(s) missing from the manifest",
            implicit.len()
        ))
        .with_details(json!({ "implicitFiles": implicit })))
    }
}

pub struct TestIntentAlignment;

impl Validator for TestIntentAlignment {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TestIntentAlignment
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let file = test_file_or_verdict!(ctx);
        let prompt_words = support::keywords(&ctx.task_prompt);
        if prompt_words.is_empty() {
            return Ok(ValidatorOutcome::pass("Prompt has no keywords to align against"));
        }
        let test_words = support::keywords(&file.content);
        let shared: Vec<&String> = prompt_words.intersection(&test_words).collect();
        let details = json!({
            "promptKeywords": prompt_words,
            "sharedKeywords": shared,
        });
        if shared.is_empty() {
            return Ok(ValidatorOutcome::warn(
                "Test shares no vocabulary with the task prompt",
            )
            .with_details(details));
        }
        Ok(ValidatorOutcome::pass(format!(
            "Test shares {} keyword(s) with the task prompt",
            shared.len()
        ))
        .with_details(details))
    }
}
