//! Gates: fixed, ordered groups of validators with one aggregation rule.

use crate::core::error::GatekeeperError;
use crate::core::validator::{ValidatorCode, ValidatorResult, ValidatorStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateKind {
    Sanitization,
    Contract,
    Execution,
    Integrity,
}

impl GateKind {
    pub const ALL: [GateKind; 4] = [
        GateKind::Sanitization,
        GateKind::Contract,
        GateKind::Execution,
        GateKind::Integrity,
    ];

    pub fn number(self) -> u8 {
        match self {
            GateKind::Sanitization => 0,
            GateKind::Contract => 1,
            GateKind::Execution => 2,
            GateKind::Integrity => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GateKind::Sanitization => "SANITIZATION",
            GateKind::Contract => "CONTRACT",
            GateKind::Execution => "EXECUTION",
            GateKind::Integrity => "INTEGRITY",
        }
    }

    pub fn from_number(n: u8) -> Result<Self, GatekeeperError> {
        Self::ALL
            .iter()
            .copied()
            .find(|g| g.number() == n)
            .ok_or_else(|| {
                GatekeeperError::ValidationError(format!("gate number {} out of range 0..=3", n))
            })
    }

    /// Validator codes owned by this gate, in execution order.
    pub fn codes(self) -> Vec<ValidatorCode> {
        ValidatorCode::ALL
            .iter()
            .copied()
            .filter(|c| c.gate() == self)
            .collect()
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub gate_number: u8,
    pub gate_name: String,
    pub status: ValidatorStatus,
    pub passed: bool,
    pub passed_count: u32,
    pub failed_count: u32,
    pub warning_count: u32,
    pub skipped_count: u32,
}

impl GateResult {
    /// `passed` iff no hard-block validator FAILED. Status escalates
    /// FAILED > RUNNING > WARNING > PASSED.
    pub fn aggregate(gate: GateKind, results: &[ValidatorResult]) -> Self {
        let count = |s: ValidatorStatus| results.iter().filter(|r| r.status == s).count() as u32;
        let passed = !results
            .iter()
            .any(|r| r.status == ValidatorStatus::Failed && r.is_hard_block);
        let has = |s: ValidatorStatus| results.iter().any(|r| r.status == s);
        let status = if has(ValidatorStatus::Failed) {
            ValidatorStatus::Failed
        } else if has(ValidatorStatus::Running) {
            ValidatorStatus::Running
        } else if has(ValidatorStatus::Warning) {
            ValidatorStatus::Warning
        } else {
            ValidatorStatus::Passed
        };
        Self {
            gate_number: gate.number(),
            gate_name: gate.name().to_string(),
            status,
            passed,
            passed_count: count(ValidatorStatus::Passed),
            failed_count: count(ValidatorStatus::Failed),
            warning_count: count(ValidatorStatus::Warning),
            skipped_count: count(ValidatorStatus::Skipped),
        }
    }
}
