//! Gate 2: does the implementation stay in scope and make its test pass?

use crate::core::context::ValidationContext;
use crate::core::error::GatekeeperError;
use crate::core::manifest::FileAction;
use crate::core::patterns;
use crate::core::validator::{Validator, ValidatorCode, ValidatorOutcome};
use crate::validators::support;
use serde_json::json;

pub struct DiffScopeEnforcement;

impl Validator for DiffScopeEnforcement {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::DiffScopeEnforcement
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let changed = ctx
            .services
            .git
            .working_tree_changes(&ctx.project_path, &ctx.base_ref)?;
        let undeclared = ctx.manifest.undeclared(&changed);
        let details = json!({
            "baseRef": ctx.base_ref,
            "changedFiles": changed,
            "undeclaredFiles": undeclared,
        });
        if undeclared.is_empty() {
            return Ok(ValidatorOutcome::pass(format!(
                "Working tree changes ({}) are all declared",
                changed.len()
            ))
            .with_details(details));
        }
        Ok(ValidatorOutcome::fail(format!(
            "{} changed file(s) are outside the manifest: {}",
            undeclared.len(),
            undeclared.join(", ")
        ))
        .with_details(details))
    }
}

/// Changed paths matching a test pattern, other than the declared test file.
/// Comparison folds separators and case.
pub fn test_edits_outside_declared(
    changed: &[String],
    test_patterns: &[String],
    declared_test: &str,
) -> Vec<String> {
    let declared = patterns::normalize_for_compare(declared_test);
    changed
        .iter()
        .filter(|p| patterns::first_match(test_patterns, p).is_some())
        .filter(|p| patterns::normalize_for_compare(p) != declared)
        .cloned()
        .collect()
}

pub struct TestReadOnlyEnforcement;

impl Validator for TestReadOnlyEnforcement {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TestReadOnlyEnforcement
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let changed = ctx
            .services
            .git
            .working_tree_changes(&ctx.project_path, &ctx.base_ref)?;
        let declared = ctx
            .test_file_relative()
            .unwrap_or_else(|| ctx.manifest.test_file.clone());
        let violations =
            test_edits_outside_declared(&changed, &ctx.config.paths.test_patterns, &declared);
        let details = json!({ "declaredTestFile": declared, "violations": violations });
        if violations.is_empty() {
            return Ok(ValidatorOutcome::pass("No test files edited besides the declared one")
                .with_details(details));
        }
        Ok(ValidatorOutcome::fail(format!(
            "Implementation edited {} test file(s): {}",
            violations.len(),
            violations.join(", ")
        ))
        .with_details(details))
    }
}

pub struct TaskTestPasses;

impl Validator for TaskTestPasses {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::TaskTestPasses
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let file = match support::load_test_file(ctx)? {
            Ok(file) => file,
            Err(verdict) => return Ok(verdict),
        };
        let Some(runner) = &ctx.services.toolchain.test_runner else {
            return Ok(ValidatorOutcome::fail("No test runner configured"));
        };
        let output = runner.run(&ctx.project_path, &[file.relative.clone()])?;
        Ok(support::runner_outcome(
            &output,
            output.passed,
            format!("{} passes", file.relative),
            format!("{} fails against the implementation", file.relative),
        ))
    }
}

pub struct StrictCompilation;

impl Validator for StrictCompilation {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::StrictCompilation
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let Some(compiler) = &ctx.services.toolchain.compiler else {
            return Ok(ValidatorOutcome::skip("No compiler configured"));
        };
        let output = compiler.run(&ctx.project_path, &[])?;
        Ok(support::runner_outcome(
            &output,
            output.passed,
            "Project compiles",
            format!("Compilation failed with {} error(s)", output.errors.len()),
        ))
    }
}

pub struct StyleConsistencyLint;

impl Validator for StyleConsistencyLint {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::StyleConsistencyLint
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let Some(linter) = &ctx.services.toolchain.linter else {
            return Ok(ValidatorOutcome::skip("No linter configured"));
        };
        let files: Vec<String> = ctx
            .manifest
            .files
            .iter()
            .filter(|e| e.action != FileAction::Delete)
            .filter(|e| ctx.project_file(&e.path).is_file())
            .map(|e| e.path.clone())
            .collect();
        if files.is_empty() {
            return Ok(ValidatorOutcome::pass("No existing manifest files to lint"));
        }
        let output = linter.run(&ctx.project_path, &files)?;
        Ok(support::runner_outcome(
            &output,
            output.passed,
            format!("{} file(s) lint clean", files.len()),
            format!("Lint reported {} error(s)", output.errors.len()),
        ))
    }
}
