//! Runs the gates a run owns, in order, and records every verdict.
//!
//! A CONTRACT run owns gates 0..=1, an EXECUTION run gates 2..=3. Gates the
//! run inherited a passed result for are not executed again. The orchestrator
//! owns the project lock for the whole sequence, switches to the run's target
//! ref when needed (restoring on every exit path), and stops at the first gate
//! whose hard-block validators did not all pass.

use crate::core::config::GatekeeperConfig;
use crate::core::context::{Services, ValidationContext};
use crate::core::error::GatekeeperError;
use crate::core::gate::{GateKind, GateResult};
use crate::core::git::{self, GitOps};
use crate::core::manifest::ValidationManifest;
use crate::core::run::{Run, RunStatus, RunStore};
use crate::core::time;
use crate::core::validator::{ValidatorResult, ValidatorStatus};
use crate::validators::ValidatorRegistry;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Puts the project back on its original ref and pops the stash.
struct RefRestore<'a> {
    git: &'a dyn GitOps,
    project: PathBuf,
    original: String,
    stashed: bool,
    armed: bool,
}

impl<'a> RefRestore<'a> {
    fn restore(&mut self) -> Vec<String> {
        if !self.armed {
            return Vec::new();
        }
        self.armed = false;
        let mut warnings = Vec::new();
        if let Err(e) = self.git.checkout(&self.project, &self.original) {
            let msg = format!("failed to restore ref {}: {}", self.original, e);
            warn!(project = %self.project.display(), "{}", msg);
            warnings.push(msg);
        }
        if self.stashed {
            if let Err(e) = self.git.stash_pop(&self.project) {
                let msg = format!(
                    "stash pop failed, local changes are still in `git stash list`: {}",
                    e
                );
                warn!(project = %self.project.display(), "{}", msg);
                warnings.push(msg);
            }
        }
        warnings
    }
}

impl Drop for RefRestore<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

pub struct GateOrchestrator {
    registry: ValidatorRegistry,
    store: RunStore,
}

impl GateOrchestrator {
    pub fn new(registry: ValidatorRegistry, store: RunStore) -> Self {
        Self { registry, store }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Drive `run` from PENDING to a terminal status, persisting as it goes.
    pub fn execute(
        &self,
        run: &mut Run,
        config: &GatekeeperConfig,
        services: &Services,
    ) -> Result<(), GatekeeperError> {
        if run.status != RunStatus::Pending {
            return Err(GatekeeperError::Conflict(format!(
                "run {} is {}, only PENDING runs can be executed",
                run.id, run.status
            )));
        }
        let project = run.project_root();
        let lock = git::project_lock(&project);
        let _held = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        info!(run_id = %run.id, run_type = %run.run_type, start_gate = run.start_gate, "run started");
        self.transition(run, RunStatus::Running)?;

        let manifest = match ValidationManifest::from_json(&run.manifest_json) {
            Ok(m) => m,
            Err(e) => return self.abort(run, format!("manifest unreadable: {}", e)),
        };

        let mut restore = match self.switch_to_target(run, services.git.as_ref(), &project) {
            Ok(restore) => restore,
            Err(e) => {
                let message = format!("could not check out {}: {}", run.target_ref, e);
                return self.abort(run, message);
            }
        };

        self.heal_test_file(run, services, &project);

        let ctx = ValidationContext {
            project_path: project.clone(),
            task_prompt: run.task_prompt.clone(),
            test_file_path: run.test_file_path.clone(),
            manifest,
            bypassed_validators: run.bypassed_validators.clone(),
            base_ref: run.base_ref.clone(),
            target_ref: run.target_ref.clone(),
            output_id: run.output_id.clone(),
            config: config.clone(),
            services: services.clone(),
        };
        let outcome = self.run_gates(run, &ctx);

        if let Some(restore) = restore.as_mut() {
            run.warnings.extend(restore.restore());
        }

        match outcome {
            Ok(()) => {
                run.updated_at = time::now_epoch_z();
                self.store.update_run(run)?;
                info!(run_id = %run.id, status = %run.status, current_gate = ?run.current_gate, "run finished");
                Ok(())
            }
            Err(e) => {
                self.abort(run, format!("run interrupted: {}", e))?;
                Err(e)
            }
        }
    }

    fn transition(&self, run: &mut Run, status: RunStatus) -> Result<(), GatekeeperError> {
        run.status = status;
        run.updated_at = time::now_epoch_z();
        self.store.update_run(run)
    }

    fn abort(&self, run: &mut Run, message: String) -> Result<(), GatekeeperError> {
        warn!(run_id = %run.id, "run aborted: {}", message);
        run.failure_message = Some(message);
        self.transition(run, RunStatus::Aborted)
    }

    fn switch_to_target<'g>(
        &self,
        run: &Run,
        git: &'g dyn GitOps,
        project: &Path,
    ) -> Result<Option<RefRestore<'g>>, GatekeeperError> {
        if run.target_ref == "HEAD" {
            return Ok(None);
        }
        let original = git.current_ref(project)?;
        if original == run.target_ref {
            return Ok(None);
        }
        debug!(from = %original, to = %run.target_ref, "switching ref");
        let stashed = git.stash(project)?;
        if let Err(e) = git.checkout(project, &run.target_ref) {
            if stashed {
                if let Err(pop) = git.stash_pop(project) {
                    warn!(project = %project.display(), error = %pop, "stash pop failed after aborted checkout");
                }
            }
            return Err(e);
        }
        let restore = RefRestore {
            git,
            project: project.to_path_buf(),
            original,
            stashed,
            armed: true,
        };
        Ok(Some(restore))
    }

    fn heal_test_file(&self, run: &mut Run, services: &Services, project: &Path) {
        let (Some(output_id), Some(test_file)) = (&run.output_id, &run.test_file_path) else {
            return;
        };
        match services.paths.heal_test_file(project, test_file, output_id) {
            Ok(_) => {}
            Err(GatekeeperError::NotFound(msg)) => debug!(run_id = %run.id, "nothing to heal: {}", msg),
            Err(e) => {
                let msg = format!("could not heal test file {}: {}", test_file, e);
                warn!(run_id = %run.id, "{}", msg);
                run.warnings.push(msg);
            }
        }
    }

    fn run_gates(&self, run: &mut Run, ctx: &ValidationContext) -> Result<(), GatekeeperError> {
        let owned = run.run_type.gates();
        let inherited: BTreeSet<u8> = self
            .store
            .gate_results(&run.id)?
            .into_iter()
            .filter(|g| g.passed)
            .map(|g| g.gate_number)
            .collect();
        for gate in GateKind::ALL {
            if gate.number() < run.start_gate || !owned.contains(&gate.number()) {
                continue;
            }
            if inherited.contains(&gate.number()) {
                debug!(run_id = %run.id, gate = gate.name(), "gate result inherited");
                continue;
            }
            run.current_gate = Some(gate.number());
            run.updated_at = time::now_epoch_z();
            self.store.update_run(run)?;

            let results = self.execute_gate(gate, ctx, &run.id)?;
            let gate_result = GateResult::aggregate(gate, &results);
            self.store.insert_gate_result(&run.id, &gate_result)?;
            info!(
                run_id = %run.id,
                gate = gate.name(),
                status = %gate_result.status,
                passed = gate_result.passed,
                "gate finished"
            );

            if !gate_result.passed {
                if let Some(blocker) = results
                    .iter()
                    .find(|r| r.status == ValidatorStatus::Failed && r.is_hard_block)
                {
                    run.failed_validator_code = Some(blocker.code);
                    run.failure_message = Some(failure_message(blocker));
                }
                run.status = RunStatus::Failed;
                return Ok(());
            }
        }
        run.status = RunStatus::Passed;
        Ok(())
    }

    fn execute_gate(
        &self,
        gate: GateKind,
        ctx: &ValidationContext,
        run_id: &str,
    ) -> Result<Vec<ValidatorResult>, GatekeeperError> {
        let mut results = Vec::new();
        for validator in self.registry.for_gate(gate) {
            let code = validator.code();
            let result = if ctx.is_bypassed(code) {
                debug!(run_id, code = %code, "bypassed");
                ValidatorResult::bypassed(code)
            } else {
                match validator.evaluate(ctx) {
                    Ok(outcome) => ValidatorResult::from_outcome(code, outcome),
                    Err(e) => {
                        warn!(run_id, code = %code, error = %e, "validator could not run");
                        ValidatorResult::infrastructure_error(code, &e)
                    }
                }
            };
            debug!(run_id, code = %code, status = %result.status, "validator finished");
            self.store.insert_validator_result(run_id, &result)?;
            results.push(result);
        }
        Ok(results)
    }
}

/// `CODE: message`, plus the offending file list when the details carry one.
fn failure_message(result: &ValidatorResult) -> String {
    let files = ["undeclaredFiles", "violations", "implicitFiles"]
        .iter()
        .filter_map(|key| result.details.get(*key).and_then(|v| v.as_array()))
        .flatten()
        .filter_map(|v| {
            v.as_str()
                .map(str::to_string)
                .or_else(|| v.get("path").and_then(|p| p.as_str()).map(str::to_string))
        })
        .collect::<Vec<_>>();
    if files.is_empty() {
        format!("{}: {}", result.code, result.message)
    } else {
        format!("{}: {} [{}]", result.code, result.message, files.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::{ValidatorCode, ValidatorOutcome};
    use serde_json::json;

    #[test]
    fn failure_message_lists_offending_files() {
        let r = ValidatorResult::from_outcome(
            ValidatorCode::DiffScopeEnforcement,
            ValidatorOutcome::fail("2 changed file(s) are outside the manifest")
                .with_details(json!({ "undeclaredFiles": ["a.ts", "b.ts"] })),
        );
        assert_eq!(
            failure_message(&r),
            "DIFF_SCOPE_ENFORCEMENT: 2 changed file(s) are outside the manifest [a.ts, b.ts]"
        );

        let r = ValidatorResult::from_outcome(
            ValidatorCode::SensitiveFilesLock,
            ValidatorOutcome::fail("sensitive")
                .with_details(json!({ "violations": [{ "path": ".env", "pattern": ".env" }] })),
        );
        assert!(failure_message(&r).ends_with("[.env]"));
    }
}
