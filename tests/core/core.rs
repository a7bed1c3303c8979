use gatekeeper::core::assets;
use gatekeeper::core::broker::DbBroker;
use gatekeeper::core::config::{self, GatekeeperConfig};
use gatekeeper::core::db;
use gatekeeper::core::error::GatekeeperError;
use gatekeeper::core::gate::{GateKind, GateResult};
use gatekeeper::core::run::{Run, RunStatus, RunStore, RunType};
use gatekeeper::core::time;
use gatekeeper::core::validator::{ValidatorCode, ValidatorOutcome, ValidatorResult};
use rusqlite::params;
use std::fs;
use std::sync::{Mutex, OnceLock};
use tempfile::tempdir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn contract_run() -> Run {
    let now = time::now_epoch_z();
    Run {
        id: time::new_id(),
        output_id: None,
        run_type: RunType::Contract,
        contract_run_id: None,
        rerun_of: None,
        start_gate: 0,
        project_path: "/srv/app".to_string(),
        task_prompt: "Add pagination to the orders table".to_string(),
        manifest_json: r#"{"files":[{"path":"src/lib/paginate.ts","action":"CREATE"}],"testFile":"src/lib/paginate.ts"}"#.to_string(),
        test_file_path: Some("src/lib/__tests__/paginate.spec.ts".to_string()),
        base_ref: "HEAD".to_string(),
        target_ref: "main".to_string(),
        bypassed_validators: Default::default(),
        status: RunStatus::Passed,
        current_gate: Some(3),
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

#[test]
fn runs_db_is_initialized_with_wal_and_foreign_keys() {
    let tmp = tempdir().expect("tempdir");
    let db_path = db::initialize_runs_db(tmp.path()).expect("init");
    assert_eq!(db_path, db::runs_db_path(tmp.path()));

    let conn = db::db_connect(&db_path.to_string_lossy()).expect("connect");
    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("pragma journal_mode");
    assert_eq!(mode.to_lowercase(), "wal");

    for table in ["runs", "gate_results", "validator_results"] {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .expect("sqlite_master");
        assert_eq!(count, 1, "missing table {table}");
    }

    // re-initializing is harmless
    db::initialize_runs_db(tmp.path()).expect("init again");
    let events = DbBroker::new(tmp.path()).read_events().expect("events");
    assert_eq!(events.iter().filter(|e| e.op == "runs.init").count(), 2);
    assert!(events.iter().all(|e| e.db_id == "runs.db" && e.status == "success"));
}

#[test]
fn results_for_unknown_runs_are_rejected() {
    let tmp = tempdir().expect("tempdir");
    let store = RunStore::open(tmp.path()).expect("store");
    let gate = GateResult::aggregate(GateKind::Sanitization, &[]);

    let err = store.insert_gate_result("missing-run", &gate).unwrap_err();
    assert!(matches!(err, GatekeeperError::RusqliteError(_)), "{err}");
    let events = store.broker().read_events().expect("events");
    let last = events.last().expect("event");
    assert_eq!(last.op, "gate_result.insert");
    assert_eq!(last.status, "error");
    assert_eq!(last.intent_ref.as_deref(), Some("missing-run"));
}

#[test]
fn derived_run_insert_is_atomic() {
    let tmp = tempdir().expect("tempdir");
    let store = RunStore::open(tmp.path()).expect("store");
    let source = contract_run();
    store.insert_run(&source).expect("source");

    let derived = Run::derive_from(&source);
    let result = ValidatorResult::from_outcome(
        ValidatorCode::TokenBudgetFit,
        ValidatorOutcome::pass("10 of 100000 tokens"),
    );
    // duplicate (run_id, code) violates the primary key halfway through
    let err = store
        .insert_derived_run(&derived, &[], &[result.clone(), result])
        .unwrap_err();
    assert!(matches!(err, GatekeeperError::RusqliteError(_)));
    assert!(matches!(
        store.get_run(&derived.id),
        Err(GatekeeperError::NotFound(_))
    ));
    assert!(store.reruns_of(&source.id).expect("lineage").is_empty());
}

#[test]
fn execution_runs_are_listed_per_contract() {
    let tmp = tempdir().expect("tempdir");
    let store = RunStore::open(tmp.path()).expect("store");
    let contract = contract_run();
    store.insert_run(&contract).expect("contract");

    let mut execution = Run::derive_from(&contract);
    execution.run_type = RunType::Execution;
    execution.contract_run_id = Some(contract.id.clone());
    execution.rerun_of = None;
    store.insert_run(&execution).expect("execution");

    let listed = store.execution_runs(&contract.id).expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, execution.id);
    assert_eq!(listed[0].status, RunStatus::Pending);
    assert!(store.execution_runs(&execution.id).expect("none").is_empty());
}

#[test]
fn init_writes_config_that_loads_as_defaults() {
    let tmp = tempdir().expect("tempdir");
    let report = assets::init_project(tmp.path(), false).expect("init");
    assert!(report.config_written);
    assert_eq!(
        GatekeeperConfig::load(tmp.path()).expect("load"),
        GatekeeperConfig::default()
    );
    let gitignore = fs::read_to_string(tmp.path().join(".gitignore")).expect("gitignore");
    for entry in assets::GITIGNORE_ENTRIES {
        assert!(gitignore.lines().any(|l| l == *entry), "missing {entry}");
    }

    fs::write(&report.config_path, "[limits]\nmax_manifest_files = 3\n").expect("edit");
    let forced = assets::init_project(tmp.path(), true).expect("force");
    assert!(forced.config_written);
    assert_eq!(
        GatekeeperConfig::load(tmp.path()).expect("load").limits.max_manifest_files,
        15
    );
}

#[test]
fn broken_config_is_a_config_error() {
    let tmp = tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join(".gatekeeper")).expect("dir");
    fs::write(
        GatekeeperConfig::config_path(tmp.path()),
        "[commands.compiler]\nargs = [\"tsc\"]\n",
    )
    .expect("write");
    let err = GatekeeperConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, GatekeeperError::ConfigError(_)), "{err}");
    assert!(err.to_string().contains("config.toml"));
}

#[test]
fn gatekeeper_home_relocates_the_data_dir() {
    let _guard = env_lock().lock().unwrap_or_else(|p| p.into_inner());
    let project = tempdir().expect("project");
    let home = tempdir().expect("home");

    unsafe { std::env::remove_var(config::HOME_ENV) };
    assert_eq!(
        config::data_dir(project.path()),
        project.path().join(".gatekeeper/data")
    );

    unsafe { std::env::set_var(config::HOME_ENV, home.path()) };
    let relocated = config::data_dir(project.path());
    unsafe { std::env::remove_var(config::HOME_ENV) };
    assert_eq!(relocated, home.path().join("data"));
}
