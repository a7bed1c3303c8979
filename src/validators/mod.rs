//! Validator implementations and the fixed code-to-validator table.

pub mod contract;
pub mod execution;
pub mod integrity;
pub mod sanitization;
pub mod support;

use crate::core::gate::GateKind;
use crate::core::validator::{Validator, ValidatorCode};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Code-keyed table of validators. Iteration follows catalogue order.
#[derive(Clone)]
pub struct ValidatorRegistry {
    validators: BTreeMap<ValidatorCode, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self {
            validators: BTreeMap::new(),
        }
    }

    /// Every validator in the catalogue.
    pub fn standard() -> Self {
        let all: Vec<Arc<dyn Validator>> = vec![
            Arc::new(sanitization::TokenBudgetFit),
            Arc::new(sanitization::TaskScopeSize),
            Arc::new(sanitization::TaskClarityCheck),
            Arc::new(sanitization::SensitiveFilesLock),
            Arc::new(sanitization::PathConvention),
            Arc::new(contract::TestSyntaxValid),
            Arc::new(contract::TestHasAssertions),
            Arc::new(contract::TestCoversHappyAndSadPath),
            Arc::new(contract::TestFailsBeforeImplementation),
            Arc::new(contract::NoDecorativeTests),
            Arc::new(contract::ManifestFileLock),
            Arc::new(contract::NoImplicitFiles),
            Arc::new(contract::TestIntentAlignment),
            Arc::new(execution::DiffScopeEnforcement),
            Arc::new(execution::TestReadOnlyEnforcement),
            Arc::new(execution::TaskTestPasses),
            Arc::new(execution::StrictCompilation),
            Arc::new(execution::StyleConsistencyLint),
            Arc::new(integrity::FullRegressionPass),
            Arc::new(integrity::ProductionBuildPass),
        ];
        let mut registry = Self::empty();
        for v in all {
            registry.register(v);
        }
        registry
    }

    /// Add or replace the validator for its code.
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        self.validators.insert(validator.code(), validator);
    }

    pub fn get(&self, code: ValidatorCode) -> Option<&Arc<dyn Validator>> {
        self.validators.get(&code)
    }

    /// Registered validators of `gate`, in execution order.
    pub fn for_gate(&self, gate: GateKind) -> Vec<Arc<dyn Validator>> {
        self.validators
            .iter()
            .filter(|(code, _)| code.gate() == gate)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn codes(&self) -> Vec<ValidatorCode> {
        self.validators.keys().copied().collect()
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.validators.keys()).finish()
    }
}
