//! Caller-facing operations over runs.

use crate::core::config::{self, GatekeeperConfig};
use crate::core::context::Services;
use crate::core::error::GatekeeperError;
use crate::core::gate::{GateKind, GateResult};
use crate::core::git::{self, PushStatus};
use crate::core::manifest::ValidationManifest;
use crate::core::orchestrator::GateOrchestrator;
use crate::core::paths::PathResolution;
use crate::core::run::{Run, RunResults, RunStatus, RunStore, RunType};
use crate::core::time;
use crate::core::validator::{ValidatorCode, ValidatorResult};
use crate::validators::ValidatorRegistry;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Inputs for a new CONTRACT run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub task_prompt: String,
    pub manifest_json: String,
    /// Project-relative or absolute. `None` with an `output_id` resolves the
    /// manifest's test file from the artifact store.
    pub test_file_path: Option<String>,
    pub output_id: Option<String>,
    /// Defaults to `HEAD`.
    pub base_ref: Option<String>,
    /// Defaults to the project's current ref.
    pub target_ref: Option<String>,
    pub bypassed_validators: BTreeSet<ValidatorCode>,
}

pub struct GatekeeperService {
    project_root: PathBuf,
    config: GatekeeperConfig,
    services: Services,
    orchestrator: GateOrchestrator,
}

impl GatekeeperService {
    /// Service for `project_root` with its config, real tools and run store.
    pub fn open(project_root: &Path) -> Result<Self, GatekeeperError> {
        let project_root = project_root
            .canonicalize()
            .map_err(|e| GatekeeperError::PathError(format!("{}: {}", project_root.display(), e)))?;
        let config = GatekeeperConfig::load(&project_root)?;
        let store = RunStore::open(&config::data_dir(&project_root))?;
        let services = Services::from_config(&project_root, &config);
        Ok(Self::with_parts(
            &project_root,
            config,
            services,
            ValidatorRegistry::standard(),
            store,
        ))
    }

    pub fn with_parts(
        project_root: &Path,
        config: GatekeeperConfig,
        services: Services,
        registry: ValidatorRegistry,
        store: RunStore,
    ) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config,
            services,
            orchestrator: GateOrchestrator::new(registry, store),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn store(&self) -> &RunStore {
        self.orchestrator.store()
    }

    /// Record a PENDING CONTRACT run. Gates run on `execute_run`.
    pub fn create_run(&self, request: RunRequest) -> Result<Run, GatekeeperError> {
        let manifest = ValidationManifest::from_json(&request.manifest_json)?;
        manifest.validate()?;

        let test_file_path = match (&request.test_file_path, &request.output_id) {
            (Some(path), _) => Some(path.clone()),
            (None, Some(output_id)) => Some(self.resolve_test_file(&manifest, output_id)),
            (None, None) => None,
        };
        let target_ref = match request.target_ref {
            Some(r) => r,
            None => self
                .services
                .git
                .current_ref(&self.project_root)
                .unwrap_or_else(|_| "HEAD".to_string()),
        };

        let now = time::now_epoch_z();
        let run = Run {
            id: time::new_id(),
            output_id: request.output_id,
            run_type: RunType::Contract,
            contract_run_id: None,
            rerun_of: None,
            start_gate: 0,
            project_path: self.project_root.to_string_lossy().to_string(),
            task_prompt: request.task_prompt,
            manifest_json: request.manifest_json,
            test_file_path,
            base_ref: request.base_ref.unwrap_or_else(|| "HEAD".to_string()),
            target_ref,
            bypassed_validators: request.bypassed_validators,
            status: RunStatus::Pending,
            current_gate: None,
            failed_validator_code: None,
            failure_message: None,
            warnings: Vec::new(),
            commit_hash: None,
            commit_message: None,
            committed_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store().insert_run(&run)?;
        info!(run_id = %run.id, "run created");
        Ok(run)
    }

    /// Place the artifact test file at its conventional path and return that
    /// path. Falls back to the manifest's declared test file.
    fn resolve_test_file(&self, manifest: &ValidationManifest, output_id: &str) -> String {
        let name = manifest
            .test_file
            .rsplit('/')
            .next()
            .unwrap_or(&manifest.test_file)
            .to_string();
        let artifact = self
            .services
            .artifacts
            .locate(output_id, &manifest.test_file)
            .or_else(|| self.services.artifacts.locate(output_id, &name))
            .unwrap_or_else(|| PathBuf::from(&name));
        match self
            .services
            .paths
            .ensure_correct_path(&artifact, manifest, &self.project_root, output_id)
        {
            Ok(PathResolution::Resolved { path, .. }) => path,
            Ok(PathResolution::NoConvention(_)) => manifest.test_file.clone(),
            Err(e) => {
                warn!(output_id, error = %e, "could not place artifact test file");
                manifest.test_file.clone()
            }
        }
    }

    /// Run the gates of a PENDING run to a terminal status.
    pub fn execute_run(&self, run_id: &str) -> Result<Run, GatekeeperError> {
        let mut run = self.store().get_run(run_id)?;
        self.orchestrator
            .execute(&mut run, &self.config, &self.services)?;
        Ok(run)
    }

    /// `create_run` followed by `execute_run`.
    pub fn submit_run(&self, request: RunRequest) -> Result<Run, GatekeeperError> {
        let run = self.create_run(request)?;
        self.execute_run(&run.id)
    }

    pub fn get_run_results(&self, run_id: &str) -> Result<RunResults, GatekeeperError> {
        self.store().results(run_id)
    }

    /// New run that re-executes gate `gate_number` of `run_id` alone. Every
    /// other gate the source passed is inherited; gates it never reached run
    /// after the rerun gate passes.
    pub fn rerun_gate(&self, run_id: &str, gate_number: u8) -> Result<Run, GatekeeperError> {
        let gate = GateKind::from_number(gate_number)?;
        let source = self.finished_run(run_id)?;
        ensure_owned(&source, gate)?;
        let gates = self.store().gate_results(&source.id)?;
        let reachable = inheritable_prefix(&gates, gate.number());
        if reachable < gate.number() {
            return Err(GatekeeperError::Conflict(format!(
                "gate {} did not pass in run {}; rerun from gate {} or earlier",
                reachable, source.id, reachable
            )));
        }
        let run = Run::derive_from(&source);
        self.start_derived(run, &source, gate.number(), &gates)
    }

    /// New run with `code` added to the inherited bypass set, rerunning the
    /// gate that owns it (or the first gate the source did not pass, if earlier).
    pub fn bypass_validator(&self, run_id: &str, code: &str) -> Result<Run, GatekeeperError> {
        let code: ValidatorCode = code.parse()?;
        let source = self.finished_run(run_id)?;
        ensure_owned(&source, code.gate())?;
        let gates = self.store().gate_results(&source.id)?;
        let start = inheritable_prefix(&gates, code.gate().number());
        let mut run = Run::derive_from(&source);
        run.bypassed_validators.insert(code);
        info!(source = %source.id, code = %code, "bypassing validator");
        self.start_derived(run, &source, start, &gates)
    }

    fn start_derived(
        &self,
        mut run: Run,
        source: &Run,
        start_gate: u8,
        source_gates: &[GateResult],
    ) -> Result<Run, GatekeeperError> {
        run.start_gate = start_gate;
        self.insert_with_inherited(&run, source, source_gates, |n| n != start_gate)?;
        info!(run_id = %run.id, rerun_of = %source.id, start_gate, "derived run created");
        self.orchestrator
            .execute(&mut run, &self.config, &self.services)?;
        Ok(run)
    }

    /// Insert `run` with the passed gates of `source` that `keep` accepts,
    /// plus their validator results, in one transaction.
    fn insert_with_inherited(
        &self,
        run: &Run,
        source: &Run,
        source_gates: &[GateResult],
        keep: impl Fn(u8) -> bool,
    ) -> Result<(), GatekeeperError> {
        let inherited_gates: Vec<GateResult> = source_gates
            .iter()
            .filter(|g| g.passed && keep(g.gate_number))
            .cloned()
            .collect();
        let inherited_results: Vec<ValidatorResult> = self
            .store()
            .validator_results(&source.id)?
            .into_iter()
            .filter(|r| inherited_gates.iter().any(|g| g.gate_number == r.gate_number))
            .collect();
        self.store()
            .insert_derived_run(run, &inherited_gates, &inherited_results)
    }

    fn finished_run(&self, run_id: &str) -> Result<Run, GatekeeperError> {
        let run = self.store().get_run(run_id)?;
        if !run.status.is_terminal() {
            return Err(GatekeeperError::Conflict(format!(
                "run {} is still {}",
                run.id, run.status
            )));
        }
        Ok(run)
    }

    /// PENDING EXECUTION run validating `target_ref` against a passed CONTRACT
    /// run. It inherits the contract's gate 0..=1 results and bypass set and
    /// executes gates 2..=3.
    pub fn create_execution_run(
        &self,
        contract_run_id: &str,
        target_ref: &str,
    ) -> Result<Run, GatekeeperError> {
        let contract = self.store().get_run(contract_run_id)?;
        if contract.run_type != RunType::Contract {
            return Err(GatekeeperError::Conflict(format!(
                "run {} is an {} run, not a CONTRACT run",
                contract.id, contract.run_type
            )));
        }
        if contract.status != RunStatus::Passed {
            return Err(GatekeeperError::Conflict(format!(
                "contract run {} is {}; only PASSED contracts can be executed",
                contract.id, contract.status
            )));
        }
        let mut run = Run::derive_from(&contract);
        run.run_type = RunType::Execution;
        run.contract_run_id = Some(contract.id.clone());
        run.rerun_of = None;
        run.target_ref = target_ref.to_string();
        run.start_gate = *RunType::Execution.gates().start();
        let contract_gates = self.store().gate_results(&contract.id)?;
        let owned = RunType::Contract.gates();
        self.insert_with_inherited(&run, &contract, &contract_gates, |n| owned.contains(&n))?;
        info!(run_id = %run.id, contract = %contract.id, target_ref, "execution run created");
        Ok(run)
    }

    /// Commit the working tree for a PASSED EXECUTION run and record the commit on it.
    pub fn commit_run(&self, run_id: &str, message: &str) -> Result<Run, GatekeeperError> {
        let mut run = self.store().get_run(run_id)?;
        if run.run_type != RunType::Execution || run.status != RunStatus::Passed {
            return Err(GatekeeperError::Conflict(format!(
                "run {} is a {} {} run; only PASSED EXECUTION runs can be committed",
                run.id, run.status, run.run_type
            )));
        }
        if let Some(hash) = &run.commit_hash {
            return Err(GatekeeperError::Conflict(format!(
                "run {} is already committed as {}",
                run.id, hash
            )));
        }
        let project = run.project_root();
        let lock = git::project_lock(&project);
        let _held = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.services.git.current_ref(&project)?;
        if run.target_ref != "HEAD" && current != run.target_ref {
            return Err(GatekeeperError::Conflict(format!(
                "project is on {}, check out {} before committing",
                current, run.target_ref
            )));
        }
        let hash = self.services.git.commit(&project, message)?;
        let now = time::now_epoch_z();
        run.commit_hash = Some(hash);
        run.commit_message = Some(message.to_string());
        run.committed_at = Some(now.clone());
        run.updated_at = now;
        self.store().update_run(&run)?;
        info!(run_id = %run.id, commit = ?run.commit_hash, "run committed");
        Ok(run)
    }

    /// Push a committed run's branch. Rejections come back as a `PushStatus`.
    pub fn push_run(
        &self,
        run_id: &str,
        remote: &str,
        branch: &str,
    ) -> Result<PushStatus, GatekeeperError> {
        let run = self.store().get_run(run_id)?;
        if run.commit_hash.is_none() {
            return Err(GatekeeperError::Conflict(format!(
                "run {} has no commit to push",
                run.id
            )));
        }
        let project = run.project_root();
        let lock = git::project_lock(&project);
        let _held = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let status = self.services.git.push(&project, remote, branch)?;
        match &status {
            PushStatus::Pushed => info!(run_id = %run.id, remote, branch, "pushed"),
            other => warn!(run_id = %run.id, remote, branch, code = other.code(), "push rejected"),
        }
        Ok(status)
    }
}

/// Gates outside the run type's range are inherited or never run; they cannot
/// be re-executed on this run.
fn ensure_owned(source: &Run, gate: GateKind) -> Result<(), GatekeeperError> {
    let owned = source.run_type.gates();
    if owned.contains(&gate.number()) {
        return Ok(());
    }
    Err(GatekeeperError::ValidationError(format!(
        "{} runs execute gates {}..={}; gate {} ({}) cannot be rerun on run {}",
        source.run_type,
        owned.start(),
        owned.end(),
        gate.number(),
        gate.name(),
        source.id
    )))
}

/// Highest gate `k <= wanted` such that every gate before `k` passed.
fn inheritable_prefix(gates: &[GateResult], wanted: u8) -> u8 {
    (0..wanted)
        .find(|n| !gates.iter().any(|g| g.gate_number == *n && g.passed))
        .unwrap_or(wanted)
}
