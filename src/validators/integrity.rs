//! Gate 3: is the rest of the project still healthy?

use crate::core::context::ValidationContext;
use crate::core::error::GatekeeperError;
use crate::core::validator::{Validator, ValidatorCode, ValidatorOutcome};
use crate::validators::support;

pub struct FullRegressionPass;

impl Validator for FullRegressionPass {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::FullRegressionPass
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let Some(runner) = &ctx.services.toolchain.test_runner else {
            return Ok(ValidatorOutcome::fail("No test runner configured"));
        };
        let output = runner.run(&ctx.project_path, &[])?;
        Ok(support::runner_outcome(
            &output,
            output.passed,
            "Full test suite passes",
            format!("Test suite failed ({} failure(s) parsed)", output.errors.len()),
        ))
    }
}

pub struct ProductionBuildPass;

impl Validator for ProductionBuildPass {
    fn code(&self) -> ValidatorCode {
        ValidatorCode::ProductionBuildPass
    }

    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError> {
        let Some(build) = &ctx.services.toolchain.build else {
            return Ok(ValidatorOutcome::skip("No build command configured"));
        };
        let output = build.run(&ctx.project_path, &[])?;
        Ok(support::runner_outcome(
            &output,
            output.passed,
            "Production build succeeds",
            "Production build failed",
        ))
    }
}
