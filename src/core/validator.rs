//! Validator protocol: codes, verdicts and the `Validator` trait.

use crate::core::context::ValidationContext;
use crate::core::error::GatekeeperError;
use crate::core::gate::GateKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Every validator the engine knows, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorCode {
    // Gate 0: sanitization
    TokenBudgetFit,
    TaskScopeSize,
    TaskClarityCheck,
    SensitiveFilesLock,
    PathConvention,
    // Gate 1: contract
    TestSyntaxValid,
    TestHasAssertions,
    TestCoversHappyAndSadPath,
    TestFailsBeforeImplementation,
    NoDecorativeTests,
    ManifestFileLock,
    NoImplicitFiles,
    TestIntentAlignment,
    // Gate 2: execution
    DiffScopeEnforcement,
    TestReadOnlyEnforcement,
    TaskTestPasses,
    StrictCompilation,
    StyleConsistencyLint,
    // Gate 3: integrity
    FullRegressionPass,
    ProductionBuildPass,
}

impl ValidatorCode {
    pub const ALL: [ValidatorCode; 20] = [
        ValidatorCode::TokenBudgetFit,
        ValidatorCode::TaskScopeSize,
        ValidatorCode::TaskClarityCheck,
        ValidatorCode::SensitiveFilesLock,
        ValidatorCode::PathConvention,
        ValidatorCode::TestSyntaxValid,
        ValidatorCode::TestHasAssertions,
        ValidatorCode::TestCoversHappyAndSadPath,
        ValidatorCode::TestFailsBeforeImplementation,
        ValidatorCode::NoDecorativeTests,
        ValidatorCode::ManifestFileLock,
        ValidatorCode::NoImplicitFiles,
        ValidatorCode::TestIntentAlignment,
        ValidatorCode::DiffScopeEnforcement,
        ValidatorCode::TestReadOnlyEnforcement,
        ValidatorCode::TaskTestPasses,
        ValidatorCode::StrictCompilation,
        ValidatorCode::StyleConsistencyLint,
        ValidatorCode::FullRegressionPass,
        ValidatorCode::ProductionBuildPass,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorCode::TokenBudgetFit => "TOKEN_BUDGET_FIT",
            ValidatorCode::TaskScopeSize => "TASK_SCOPE_SIZE",
            ValidatorCode::TaskClarityCheck => "TASK_CLARITY_CHECK",
            ValidatorCode::SensitiveFilesLock => "SENSITIVE_FILES_LOCK",
            ValidatorCode::PathConvention => "PATH_CONVENTION",
            ValidatorCode::TestSyntaxValid => "TEST_SYNTAX_VALID",
            ValidatorCode::TestHasAssertions => "TEST_HAS_ASSERTIONS",
            ValidatorCode::TestCoversHappyAndSadPath => "TEST_COVERS_HAPPY_AND_SAD_PATH",
            ValidatorCode::TestFailsBeforeImplementation => "TEST_FAILS_BEFORE_IMPLEMENTATION",
            ValidatorCode::NoDecorativeTests => "NO_DECORATIVE_TESTS",
            ValidatorCode::ManifestFileLock => "MANIFEST_FILE_LOCK",
            ValidatorCode::NoImplicitFiles => "NO_IMPLICIT_FILES",
            ValidatorCode::TestIntentAlignment => "TEST_INTENT_ALIGNMENT",
            ValidatorCode::DiffScopeEnforcement => "DIFF_SCOPE_ENFORCEMENT",
            ValidatorCode::TestReadOnlyEnforcement => "TEST_READ_ONLY_ENFORCEMENT",
            ValidatorCode::TaskTestPasses => "TASK_TEST_PASSES",
            ValidatorCode::StrictCompilation => "STRICT_COMPILATION",
            ValidatorCode::StyleConsistencyLint => "STYLE_CONSISTENCY_LINT",
            ValidatorCode::FullRegressionPass => "FULL_REGRESSION_PASS",
            ValidatorCode::ProductionBuildPass => "PRODUCTION_BUILD_PASS",
        }
    }

    pub fn gate(self) -> GateKind {
        use ValidatorCode::*;
        match self {
            TokenBudgetFit | TaskScopeSize | TaskClarityCheck | SensitiveFilesLock
            | PathConvention => GateKind::Sanitization,
            TestSyntaxValid
            | TestHasAssertions
            | TestCoversHappyAndSadPath
            | TestFailsBeforeImplementation
            | NoDecorativeTests
            | ManifestFileLock
            | NoImplicitFiles
            | TestIntentAlignment => GateKind::Contract,
            DiffScopeEnforcement | TestReadOnlyEnforcement | TaskTestPasses
            | StrictCompilation | StyleConsistencyLint => GateKind::Execution,
            FullRegressionPass | ProductionBuildPass => GateKind::Integrity,
        }
    }

    /// 1-based position within the owning gate.
    pub fn order(self) -> u8 {
        let gate = self.gate();
        let position = Self::ALL
            .iter()
            .filter(|c| c.gate() == gate)
            .position(|c| *c == self)
            .unwrap_or_default();
        position as u8 + 1
    }

    pub fn is_hard_block(self) -> bool {
        !matches!(
            self,
            ValidatorCode::TaskScopeSize
                | ValidatorCode::TaskClarityCheck
                | ValidatorCode::PathConvention
                | ValidatorCode::TestCoversHappyAndSadPath
                | ValidatorCode::NoImplicitFiles
                | ValidatorCode::TestIntentAlignment
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            ValidatorCode::TokenBudgetFit => "Prompt plus touched files fit the token budget",
            ValidatorCode::TaskScopeSize => "Manifest is small enough to review",
            ValidatorCode::TaskClarityCheck => "Task prompt is specific",
            ValidatorCode::SensitiveFilesLock => "No sensitive paths in the manifest",
            ValidatorCode::PathConvention => "Test file sits at its conventional path",
            ValidatorCode::TestSyntaxValid => "Test file compiles",
            ValidatorCode::TestHasAssertions => "Test file asserts something",
            ValidatorCode::TestCoversHappyAndSadPath => "Tests cover success and failure paths",
            ValidatorCode::TestFailsBeforeImplementation => "Test fails against the base ref",
            ValidatorCode::NoDecorativeTests => "No empty or tautological tests",
            ValidatorCode::ManifestFileLock => "Committed diff stays inside the manifest",
            ValidatorCode::NoImplicitFiles => "Files named in the prompt are declared",
            ValidatorCode::TestIntentAlignment => "Test vocabulary matches the task",
            ValidatorCode::DiffScopeEnforcement => "Working tree diff stays inside the manifest",
            ValidatorCode::TestReadOnlyEnforcement => "Only the declared test file was edited",
            ValidatorCode::TaskTestPasses => "Declared test passes",
            ValidatorCode::StrictCompilation => "Project compiles",
            ValidatorCode::StyleConsistencyLint => "Touched files lint clean",
            ValidatorCode::FullRegressionPass => "Full test suite passes",
            ValidatorCode::ProductionBuildPass => "Production build succeeds",
        }
    }
}

impl fmt::Display for ValidatorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValidatorCode {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| GatekeeperError::NotFound(format!("unknown validator code '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorStatus {
    Passed,
    Failed,
    Warning,
    Skipped,
    Running,
}

impl ValidatorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorStatus::Passed => "PASSED",
            ValidatorStatus::Failed => "FAILED",
            ValidatorStatus::Warning => "WARNING",
            ValidatorStatus::Skipped => "SKIPPED",
            ValidatorStatus::Running => "RUNNING",
        }
    }
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValidatorStatus {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASSED" => Ok(ValidatorStatus::Passed),
            "FAILED" => Ok(ValidatorStatus::Failed),
            "WARNING" => Ok(ValidatorStatus::Warning),
            "SKIPPED" => Ok(ValidatorStatus::Skipped),
            "RUNNING" => Ok(ValidatorStatus::Running),
            other => Err(GatekeeperError::ValidationError(format!(
                "unknown validator status '{}'",
                other
            ))),
        }
    }
}

/// What a validator decided. The orchestrator turns it into a `ValidatorResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorOutcome {
    pub status: ValidatorStatus,
    pub message: String,
    pub details: JsonValue,
    pub evidence: Option<String>,
}

impl ValidatorOutcome {
    fn new(status: ValidatorStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: JsonValue::Object(Default::default()),
            evidence: None,
        }
    }

    pub fn pass(message: impl Into<String>) -> Self {
        Self::new(ValidatorStatus::Passed, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(ValidatorStatus::Failed, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(ValidatorStatus::Warning, message)
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(ValidatorStatus::Skipped, message)
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorResult {
    pub code: ValidatorCode,
    pub gate_number: u8,
    pub order: u8,
    pub status: ValidatorStatus,
    pub passed: bool,
    pub is_hard_block: bool,
    pub bypassed: bool,
    pub message: String,
    pub details: JsonValue,
    pub evidence: Option<String>,
}

impl ValidatorResult {
    /// Soft validators never block: their FAILED verdicts are recorded as WARNING.
    pub fn from_outcome(code: ValidatorCode, outcome: ValidatorOutcome) -> Self {
        let hard = code.is_hard_block();
        let status = match outcome.status {
            ValidatorStatus::Failed if !hard => ValidatorStatus::Warning,
            other => other,
        };
        Self {
            code,
            gate_number: code.gate().number(),
            order: code.order(),
            status,
            passed: status != ValidatorStatus::Failed,
            is_hard_block: hard,
            bypassed: false,
            message: outcome.message,
            details: outcome.details,
            evidence: outcome.evidence,
        }
    }

    pub fn bypassed(code: ValidatorCode) -> Self {
        Self {
            code,
            gate_number: code.gate().number(),
            order: code.order(),
            status: ValidatorStatus::Skipped,
            passed: true,
            is_hard_block: code.is_hard_block(),
            bypassed: true,
            message: "Bypassed by user".to_string(),
            details: JsonValue::Object(Default::default()),
            evidence: None,
        }
    }

    /// The validator could not run at all. Always blocks.
    pub fn infrastructure_error(code: ValidatorCode, err: &GatekeeperError) -> Self {
        Self {
            code,
            gate_number: code.gate().number(),
            order: code.order(),
            status: ValidatorStatus::Failed,
            passed: false,
            is_hard_block: true,
            bypassed: false,
            message: format!("{} could not run: {}", code, err),
            details: serde_json::json!({ "error": err.to_string() }),
            evidence: None,
        }
    }
}

pub trait Validator: Send + Sync {
    fn code(&self) -> ValidatorCode;

    /// Pure policy check. Policy failures are `Ok` outcomes; `Err` means the
    /// check itself could not be carried out.
    fn evaluate(&self, ctx: &ValidationContext) -> Result<ValidatorOutcome, GatekeeperError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_are_one_based_per_gate() {
        assert_eq!(ValidatorCode::TokenBudgetFit.order(), 1);
        assert_eq!(ValidatorCode::PathConvention.order(), 5);
        assert_eq!(ValidatorCode::TestFailsBeforeImplementation.order(), 4);
        assert_eq!(ValidatorCode::TestIntentAlignment.order(), 8);
        assert_eq!(ValidatorCode::StyleConsistencyLint.order(), 5);
        assert_eq!(ValidatorCode::ProductionBuildPass.order(), 2);
    }

    #[test]
    fn codes_parse_case_insensitively() {
        assert_eq!(
            "diff_scope_enforcement".parse::<ValidatorCode>().expect("parse"),
            ValidatorCode::DiffScopeEnforcement
        );
        assert!("NOT_A_CODE".parse::<ValidatorCode>().is_err());
        for code in ValidatorCode::ALL {
            assert_eq!(code.as_str().parse::<ValidatorCode>().expect("roundtrip"), code);
        }
    }

    #[test]
    fn serde_name_matches_as_str() {
        let json = serde_json::to_string(&ValidatorCode::TestCoversHappyAndSadPath).expect("json");
        assert_eq!(json, "\"TEST_COVERS_HAPPY_AND_SAD_PATH\"");
    }

    #[test]
    fn soft_failures_become_warnings() {
        let r = ValidatorResult::from_outcome(
            ValidatorCode::TaskClarityCheck,
            ValidatorOutcome::fail("vague"),
        );
        assert_eq!(r.status, ValidatorStatus::Warning);
        assert!(r.passed);
        assert!(!r.is_hard_block);

        let r = ValidatorResult::from_outcome(
            ValidatorCode::ManifestFileLock,
            ValidatorOutcome::fail("scope"),
        );
        assert_eq!(r.status, ValidatorStatus::Failed);
        assert!(!r.passed);
    }

    #[test]
    fn bypassed_result_shape() {
        let r = ValidatorResult::bypassed(ValidatorCode::TaskTestPasses);
        assert_eq!(r.status, ValidatorStatus::Skipped);
        assert!(r.passed && r.bypassed);
        assert_eq!(r.gate_number, 2);
    }

    #[test]
    fn infrastructure_errors_block() {
        let err = GatekeeperError::RunnerError("failed to spawn 'npx'".to_string());
        let r = ValidatorResult::infrastructure_error(ValidatorCode::TaskScopeSize, &err);
        assert!(r.is_hard_block);
        assert!(!r.passed);
        assert!(r.details["error"].as_str().unwrap_or_default().contains("npx"));
    }
}
