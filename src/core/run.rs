//! Runs: one persisted validation attempt, its results and its lineage.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::GatekeeperError;
use crate::core::gate::GateResult;
use crate::core::time;
use crate::core::validator::{ValidatorCode, ValidatorResult, ValidatorStatus};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunType {
    Contract,
    Execution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Aborted,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $s:expr),* $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self { $( $ty::$variant => $s, )* }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = GatekeeperError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $s => Ok($ty::$variant), )*
                    other => Err(GatekeeperError::ValidationError(format!(
                        concat!("unknown ", stringify!($ty), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

str_enum!(RunType { Contract => "CONTRACT", Execution => "EXECUTION" });
str_enum!(RunStatus {
    Pending => "PENDING",
    Running => "RUNNING",
    Passed => "PASSED",
    Failed => "FAILED",
    Aborted => "ABORTED",
});

impl RunType {
    /// Gates a run of this type executes. EXECUTION runs inherit gates 0..=1
    /// from their contract.
    pub fn gates(self) -> RangeInclusive<u8> {
        match self {
            RunType::Contract => 0..=1,
            RunType::Execution => 2..=3,
        }
    }
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::Failed | RunStatus::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub output_id: Option<String>,
    pub run_type: RunType,
    pub contract_run_id: Option<String>,
    pub rerun_of: Option<String>,
    /// First gate this run may execute. Gates it inherited a passed result
    /// for are never re-executed.
    pub start_gate: u8,
    pub project_path: String,
    pub task_prompt: String,
    pub manifest_json: String,
    pub test_file_path: Option<String>,
    pub base_ref: String,
    pub target_ref: String,
    pub bypassed_validators: BTreeSet<ValidatorCode>,
    pub status: RunStatus,
    pub current_gate: Option<u8>,
    pub failed_validator_code: Option<ValidatorCode>,
    pub failure_message: Option<String>,
    pub warnings: Vec<String>,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub committed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Run {
    pub fn project_root(&self) -> PathBuf {
        PathBuf::from(&self.project_path)
    }

    /// Fresh PENDING run inheriting every input of `source`.
    pub fn derive_from(source: &Run) -> Run {
        let now = time::now_epoch_z();
        Run {
            id: time::new_id(),
            output_id: source.output_id.clone(),
            run_type: source.run_type,
            contract_run_id: source.contract_run_id.clone(),
            rerun_of: Some(source.id.clone()),
            start_gate: 0,
            project_path: source.project_path.clone(),
            task_prompt: source.task_prompt.clone(),
            manifest_json: source.manifest_json.clone(),
            test_file_path: source.test_file_path.clone(),
            base_ref: source.base_ref.clone(),
            target_ref: source.target_ref.clone(),
            bypassed_validators: source.bypassed_validators.clone(),
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
        }
    }
}

/// A run with everything recorded against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResults {
    pub run: Run,
    pub gate_results: Vec<GateResult>,
    pub validator_results: Vec<ValidatorResult>,
}

impl RunResults {
    /// Results of failed hard-block validators, in execution order.
    pub fn blocking_failures(&self) -> Vec<&ValidatorResult> {
        self.validator_results
            .iter()
            .filter(|r| r.status == ValidatorStatus::Failed && r.is_hard_block)
            .collect()
    }
}

/// SQLite-backed persistence for runs, behind the audit broker.
#[derive(Debug, Clone)]
pub struct RunStore {
    broker: DbBroker,
    db_path: PathBuf,
}

const RUN_COLUMNS: &str = "id, output_id, run_type, contract_run_id, rerun_of, start_gate, \
    project_path, task_prompt, manifest_json, test_file_path, base_ref, target_ref, \
    bypassed_validators, status, current_gate, failed_validator_code, failure_message, \
    warnings, commit_hash, commit_message, committed_at, created_at, updated_at";

impl RunStore {
    /// Open (creating if needed) the run store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, GatekeeperError> {
        let db_path = db::initialize_runs_db(data_dir)?;
        Ok(Self {
            broker: DbBroker::new(data_dir),
            db_path,
        })
    }

    pub fn broker(&self) -> &DbBroker {
        &self.broker
    }

    pub fn insert_run(&self, run: &Run) -> Result<(), GatekeeperError> {
        self.broker
            .with_conn(&self.db_path, "gatekeeper", Some(&run.id), "run.insert", |conn| {
                insert_run_row(conn, run)
            })
    }

    /// Persist the mutable lifecycle fields of a run. Inputs are never rewritten.
    pub fn update_run(&self, run: &Run) -> Result<(), GatekeeperError> {
        self.broker
            .with_conn(&self.db_path, "gatekeeper", Some(&run.id), "run.update", |conn| {
                let warnings = serde_json::to_string(&run.warnings)?;
                let changed = conn.execute(
                    "UPDATE runs SET status = ?2, current_gate = ?3, failed_validator_code = ?4,
                        failure_message = ?5, warnings = ?6, commit_hash = ?7,
                        commit_message = ?8, committed_at = ?9, updated_at = ?10
                     WHERE id = ?1",
                    params![
                        run.id,
                        run.status.as_str(),
                        run.current_gate,
                        run.failed_validator_code.map(|c| c.as_str()),
                        run.failure_message,
                        warnings,
                        run.commit_hash,
                        run.commit_message,
                        run.committed_at,
                        run.updated_at,
                    ],
                )?;
                if changed == 0 {
                    return Err(GatekeeperError::NotFound(format!("run {}", run.id)));
                }
                Ok(())
            })
    }

    pub fn get_run(&self, id: &str) -> Result<Run, GatekeeperError> {
        self.broker
            .with_conn(&self.db_path, "gatekeeper", Some(id), "run.get", |conn| {
                let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
                let row = conn
                    .query_row(&sql, params![id], |row| Ok(RawRun::from_row(row)))
                    .optional()?;
                match row {
                    Some(raw) => raw?.into_run(),
                    None => Err(GatekeeperError::NotFound(format!("run {}", id))),
                }
            })
    }

    /// EXECUTION runs created from `contract_run_id`, oldest first.
    pub fn execution_runs(&self, contract_run_id: &str) -> Result<Vec<Run>, GatekeeperError> {
        self.query_runs(
            "run.list_executions",
            Some(contract_run_id),
            &format!(
                "SELECT {} FROM runs WHERE contract_run_id = ?1 AND run_type = 'EXECUTION' \
                 ORDER BY created_at, id",
                RUN_COLUMNS
            ),
            contract_run_id,
        )
    }

    /// Reruns and bypass runs derived from `run_id`, oldest first.
    pub fn reruns_of(&self, run_id: &str) -> Result<Vec<Run>, GatekeeperError> {
        self.query_runs(
            "run.list_reruns",
            Some(run_id),
            &format!(
                "SELECT {} FROM runs WHERE rerun_of = ?1 ORDER BY created_at, id",
                RUN_COLUMNS
            ),
            run_id,
        )
    }

    fn query_runs(
        &self,
        op: &str,
        intent_ref: Option<&str>,
        sql: &str,
        arg: &str,
    ) -> Result<Vec<Run>, GatekeeperError> {
        self.broker
            .with_conn(&self.db_path, "gatekeeper", intent_ref, op, |conn| {
                let mut stmt = conn.prepare(sql)?;
                let raws = stmt
                    .query_map(params![arg], |row| Ok(RawRun::from_row(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                raws.into_iter().map(|raw| raw?.into_run()).collect()
            })
    }

    pub fn insert_validator_result(
        &self,
        run_id: &str,
        result: &ValidatorResult,
    ) -> Result<(), GatekeeperError> {
        self.broker.with_conn(
            &self.db_path,
            "gatekeeper",
            Some(run_id),
            "validator_result.insert",
            |conn| insert_validator_result(conn, run_id, result),
        )
    }

    pub fn insert_gate_result(&self, run_id: &str, gate: &GateResult) -> Result<(), GatekeeperError> {
        self.broker.with_conn(
            &self.db_path,
            "gatekeeper",
            Some(run_id),
            "gate_result.insert",
            |conn| insert_gate_result(conn, run_id, gate),
        )
    }

    /// Insert a derived run together with the results it inherits, atomically.
    pub fn insert_derived_run(
        &self,
        run: &Run,
        gates: &[GateResult],
        validators: &[ValidatorResult],
    ) -> Result<(), GatekeeperError> {
        self.broker.with_conn(
            &self.db_path,
            "gatekeeper",
            Some(&run.id),
            "run.insert_derived",
            |conn| {
                let tx = conn.unchecked_transaction()?;
                insert_run_row(&tx, run)?;
                for gate in gates {
                    insert_gate_result(&tx, &run.id, gate)?;
                }
                for result in validators {
                    insert_validator_result(&tx, &run.id, result)?;
                }
                tx.commit()?;
                Ok(())
            },
        )
    }

    pub fn gate_results(&self, run_id: &str) -> Result<Vec<GateResult>, GatekeeperError> {
        self.broker
            .with_conn(&self.db_path, "gatekeeper", Some(run_id), "gate_result.list", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT gate_number, gate_name, status, passed, passed_count, failed_count,
                            warning_count, skipped_count
                     FROM gate_results WHERE run_id = ?1 ORDER BY gate_number",
                )?;
                let rows = stmt
                    .query_map(params![run_id], |row| {
                        Ok((
                            row.get::<_, u8>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, bool>(3)?,
                            row.get::<_, u32>(4)?,
                            row.get::<_, u32>(5)?,
                            row.get::<_, u32>(6)?,
                            row.get::<_, u32>(7)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|(n, name, status, passed, p, f, w, s)| {
                        Ok(GateResult {
                            gate_number: n,
                            gate_name: name,
                            status: status.parse()?,
                            passed,
                            passed_count: p,
                            failed_count: f,
                            warning_count: w,
                            skipped_count: s,
                        })
                    })
                    .collect()
            })
    }

    pub fn validator_results(&self, run_id: &str) -> Result<Vec<ValidatorResult>, GatekeeperError> {
        self.broker.with_conn(
            &self.db_path,
            "gatekeeper",
            Some(run_id),
            "validator_result.list",
            |conn| {
                let mut stmt = conn.prepare(
                    "SELECT code, gate_number, ord, status, passed, is_hard_block, bypassed,
                            message, details, evidence
                     FROM validator_results WHERE run_id = ?1 ORDER BY gate_number, ord",
                )?;
                let rows = stmt
                    .query_map(params![run_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, u8>(1)?,
                            row.get::<_, u8>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, bool>(4)?,
                            row.get::<_, bool>(5)?,
                            row.get::<_, bool>(6)?,
                            row.get::<_, String>(7)?,
                            row.get::<_, String>(8)?,
                            row.get::<_, Option<String>>(9)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(
                        |(code, gate, ord, status, passed, hard, bypassed, message, details, evidence)| {
                            Ok(ValidatorResult {
                                code: code.parse()?,
                                gate_number: gate,
                                order: ord,
                                status: status.parse()?,
                                passed,
                                is_hard_block: hard,
                                bypassed,
                                message,
                                details: serde_json::from_str(&details)?,
                                evidence,
                            })
                        },
                    )
                    .collect()
            },
        )
    }

    pub fn results(&self, run_id: &str) -> Result<RunResults, GatekeeperError> {
        Ok(RunResults {
            run: self.get_run(run_id)?,
            gate_results: self.gate_results(run_id)?,
            validator_results: self.validator_results(run_id)?,
        })
    }
}

fn insert_run_row(conn: &Connection, run: &Run) -> Result<(), GatekeeperError> {
    let bypassed = serde_json::to_string(&run.bypassed_validators)?;
    let warnings = serde_json::to_string(&run.warnings)?;
    conn.execute(
        &format!(
            "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
             ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            RUN_COLUMNS
        ),
        params![
            run.id,
            run.output_id,
            run.run_type.as_str(),
            run.contract_run_id,
            run.rerun_of,
            run.start_gate,
            run.project_path,
            run.task_prompt,
            run.manifest_json,
            run.test_file_path,
            run.base_ref,
            run.target_ref,
            bypassed,
            run.status.as_str(),
            run.current_gate,
            run.failed_validator_code.map(|c| c.as_str()),
            run.failure_message,
            warnings,
            run.commit_hash,
            run.commit_message,
            run.committed_at,
            run.created_at,
            run.updated_at,
        ],
    )?;
    Ok(())
}

fn insert_validator_result(
    conn: &Connection,
    run_id: &str,
    r: &ValidatorResult,
) -> Result<(), GatekeeperError> {
    conn.execute(
        "INSERT INTO validator_results (run_id, code, gate_number, ord, status, passed,
            is_hard_block, bypassed, message, details, evidence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            run_id,
            r.code.as_str(),
            r.gate_number,
            r.order,
            r.status.as_str(),
            r.passed,
            r.is_hard_block,
            r.bypassed,
            r.message,
            serde_json::to_string(&r.details)?,
            r.evidence,
            time::now_epoch_z(),
        ],
    )?;
    Ok(())
}

fn insert_gate_result(conn: &Connection, run_id: &str, g: &GateResult) -> Result<(), GatekeeperError> {
    conn.execute(
        "INSERT INTO gate_results (run_id, gate_number, gate_name, status, passed, passed_count,
            failed_count, warning_count, skipped_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run_id,
            g.gate_number,
            g.gate_name,
            g.status.as_str(),
            g.passed,
            g.passed_count,
            g.failed_count,
            g.warning_count,
            g.skipped_count,
            time::now_epoch_z(),
        ],
    )?;
    Ok(())
}

/// Column values as stored; parsed into a `Run` outside the rusqlite row closure.
struct RawRun {
    id: String,
    output_id: Option<String>,
    run_type: String,
    contract_run_id: Option<String>,
    rerun_of: Option<String>,
    start_gate: u8,
    project_path: String,
    task_prompt: String,
    manifest_json: String,
    test_file_path: Option<String>,
    base_ref: String,
    target_ref: String,
    bypassed_validators: String,
    status: String,
    current_gate: Option<u8>,
    failed_validator_code: Option<String>,
    failure_message: Option<String>,
    warnings: String,
    commit_hash: Option<String>,
    commit_message: Option<String>,
    committed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> Result<Self, GatekeeperError> {
        Ok(Self {
            id: row.get(0)?,
            output_id: row.get(1)?,
            run_type: row.get(2)?,
            contract_run_id: row.get(3)?,
            rerun_of: row.get(4)?,
            start_gate: row.get(5)?,
            project_path: row.get(6)?,
            task_prompt: row.get(7)?,
            manifest_json: row.get(8)?,
            test_file_path: row.get(9)?,
            base_ref: row.get(10)?,
            target_ref: row.get(11)?,
            bypassed_validators: row.get(12)?,
            status: row.get(13)?,
            current_gate: row.get(14)?,
            failed_validator_code: row.get(15)?,
            failure_message: row.get(16)?,
            warnings: row.get(17)?,
            commit_hash: row.get(18)?,
            commit_message: row.get(19)?,
            committed_at: row.get(20)?,
            created_at: row.get(21)?,
            updated_at: row.get(22)?,
        })
    }

    fn into_run(self) -> Result<Run, GatekeeperError> {
        Ok(Run {
            id: self.id,
            output_id: self.output_id,
            run_type: self.run_type.parse()?,
            contract_run_id: self.contract_run_id,
            rerun_of: self.rerun_of,
            start_gate: self.start_gate,
            project_path: self.project_path,
            task_prompt: self.task_prompt,
            manifest_json: self.manifest_json,
            test_file_path: self.test_file_path,
            base_ref: self.base_ref,
            target_ref: self.target_ref,
            bypassed_validators: serde_json::from_str(&self.bypassed_validators)?,
            status: self.status.parse()?,
            current_gate: self.current_gate,
            failed_validator_code: self
                .failed_validator_code
                .map(|c| c.parse())
                .transpose()?,
            failure_message: self.failure_message,
            warnings: serde_json::from_str(&self.warnings)?,
            commit_hash: self.commit_hash,
            commit_message: self.commit_message,
            committed_at: self.committed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
