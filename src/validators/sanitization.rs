//! Gate 0: is the task itself sane to attempt?

use crate::core::context::ValidationContext;
use crate::core::error::GatekeeperError;
use crate::core::patterns;
use crate::core::validator::{Validator, ValidatorCode, ValidatorOutcome};
use crate::validators::support;
use serde_json::json;
use std::fs;

const BUDGET_WARNING_RATIO: f64 = 0.8;
const MIN_PROMPT_WORDS: usize = 4;
const AMBIGUOUS_TERMS: &[&str] = &[
    "etc",
    "somehow",
    "improve",
    "and so on",
    "whatever",
    "something like",
    "stuff",
    "as needed",
];

pub struct TokenBudgetFit;

impl Validator for TokenBudgetFit {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TokenBudgetFit
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let budget = ctx.config.limits.token_budget;
        let mut text = ctx.task_prompt.clone();
        let mut counted = Vec::new();
        let mut skipped = Vec::new();
        for path in ctx.manifest.paths() {
            let abs = ctx.project_file(path);
            if !abs.is_file() {
                continue;
            }
            // binary assets carry no prompt context
            match String::from_utf8(fs::read(&abs)?) {
                Ok(content) => {
                    text.push('\n');
                    text.push_str(&content);
                    counted.push(path.to_string());
                }
                Err(_) => skipped.push(path.to_string()),
            }
        }
        let tokens = support::count_tokens(&text)?;
        let details = json!({
            "tokens": tokens,
            "budget": budget,
            "countedFiles": counted,
            "skippedFiles": skipped,
        });
        let outcome = if tokens > budget {
            ValidatorOutcome::fail(format!(
                "Task context is {} tokens, over the budget of {}",
                tokens, budget
            ))
        } else if tokens as f64 > budget as f64 * BUDGET_WARNING_RATIO {
            ValidatorOutcome::warn(format!(
                "Task context is {} tokens, close to the budget of {}",
                tokens, budget
            ))
        } else {
            ValidatorOutcome::pass(format!("{} of {} tokens", tokens, budget))
        };
        Ok(outcome.with_details(details))
    }
}

pub struct TaskScopeSize;

impl Validator for TaskScopeSize {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TaskScopeSize
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let count = ctx.manifest.files.len();
        let max = ctx.config.limits.max_manifest_files;
        let details = json!({ "fileCount": count, "max": max });
        if count > max {
            return Ok(ValidatorOutcome::warn(format!(
                "Manifest touches {} files (more than {}); consider splitting the task",
                count, max
            ))
            .with_details(details));
        }
        Ok(ValidatorOutcome::pass(format!("Manifest touches {} files", count)).with_details(details))
    }
}

pub struct TaskClarityCheck;

impl Validator for TaskClarityCheck {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TaskClarityCheck
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let prompt = ctx.task_prompt.trim();
        let words = prompt.split_whitespace().count();
        if words < MIN_PROMPT_WORDS {
            return Ok(ValidatorOutcome::warn(format!(
                "Task prompt has {} words; describe the expected behaviour",
                words
            ))
            .with_details(json!({ "wordCount": words })));
        }
        let lower = prompt.to_lowercase();
        let found: Vec<&str> = AMBIGUOUS_TERMS
            .iter()
            .copied()
            .filter(|term| contains_term(&lower, term))
            .collect();
        if !found.is_empty() {
            return Ok(ValidatorOutcome::warn(format!(
                "Task prompt uses ambiguous wording: {}",
                found.join(", ")
            ))
            .with_details(json!({ "ambiguousTerms": found })));
        }
        Ok(ValidatorOutcome::pass("Task prompt is specific"))
    }
}

/// Whole-word containment, so `improvement` does not match `improve`.
fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

pub struct SensitiveFilesLock;

impl Validator for SensitiveFilesLock {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::SensitiveFilesLock
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let sensitive = &ctx.config.paths.sensitive_paths;
        let violations: Vec<_> = ctx
            .manifest
            .paths()
            .filter_map(|path| {
                patterns::first_match(sensitive, path)
                    .map(|pattern| json!({ "path": path, "pattern": pattern }))
            })
            .collect();
        if violations.is_empty() {
            return Ok(ValidatorOutcome::pass("No sensitive paths in the manifest"));
        }
        Ok(ValidatorOutcome::fail(format!(
            "Manifest touches {} sensitive path(s)",
            violations.len()
        ))
        .with_details(json!({ "violations": violations })))
    }
}

pub struct PathConvention;

impl Validator for PathConvention {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::PathConvention
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let paths = &ctx.services.paths;
        let test_type = paths.detect_test_type(&ctx.manifest);
        let declared = ctx
            .test_file_relative()
            .unwrap_or_else(|| ctx.manifest.test_file.clone());
        let Some(canonical) = paths.canonical_path(test_type, &declared) else {
            return Ok(ValidatorOutcome::warn(format!(
                "No path convention configured for {} tests",
                test_type
            ))
            .with_details(json!({ "testType": test_type.as_str() })));
        };
        let details = json!({
            "testType": test_type.as_str(),
            "declared": declared,
            "canonical": canonical,
        });
        if patterns::normalize_for_compare(&declared) != patterns::normalize_for_compare(&canonical)
        {
            return Ok(ValidatorOutcome::warn(format!(
                "Test file {} is not at the conventional path {}",
                declared, canonical
            ))
            .with_details(details));
        }
        Ok(ValidatorOutcome::pass(format!("Test file follows the {} convention", test_type))
            .with_details(details))
    }
}
