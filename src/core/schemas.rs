//! SQLite schema for the run store.
//!
//! One database (`runs.db`) holds every validation attempt. Rows are only ever
//! inserted for gate and validator results; a rerun or bypass creates a new
//! run instead of touching an old one.

pub const RUNS_DB_NAME: &str = "runs.db";

pub const RUNS_DB_SCHEMA_RUNS: &str = "
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        output_id TEXT,
        run_type TEXT NOT NULL,
        contract_run_id TEXT,
        rerun_of TEXT,
        start_gate INTEGER NOT NULL DEFAULT 0,
        project_path TEXT NOT NULL,
        task_prompt TEXT NOT NULL,
        manifest_json TEXT NOT NULL,
        test_file_path TEXT,
        base_ref TEXT NOT NULL,
        target_ref TEXT NOT NULL,
        bypassed_validators TEXT NOT NULL DEFAULT '[]', -- JSON array of validator codes
        status TEXT NOT NULL,
        current_gate INTEGER,
        failed_validator_code TEXT,
        failure_message TEXT,
        warnings TEXT NOT NULL DEFAULT '[]', -- JSON array of strings
        commit_hash TEXT,
        commit_message TEXT,
        committed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(contract_run_id) REFERENCES runs(id),
        FOREIGN KEY(rerun_of) REFERENCES runs(id)
    )
";

pub const RUNS_DB_SCHEMA_GATE_RESULTS: &str = "
    CREATE TABLE IF NOT EXISTS gate_results (
        run_id TEXT NOT NULL,
        gate_number INTEGER NOT NULL,
        gate_name TEXT NOT NULL,
        status TEXT NOT NULL,
        passed INTEGER NOT NULL,
        passed_count INTEGER NOT NULL,
        failed_count INTEGER NOT NULL,
        warning_count INTEGER NOT NULL,
        skipped_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY(run_id, gate_number),
        FOREIGN KEY(run_id) REFERENCES runs(id)
    )
";

pub const RUNS_DB_SCHEMA_VALIDATOR_RESULTS: &str = "
    CREATE TABLE IF NOT EXISTS validator_results (
        run_id TEXT NOT NULL,
        code TEXT NOT NULL,
        gate_number INTEGER NOT NULL,
        ord INTEGER NOT NULL,
        status TEXT NOT NULL,
        passed INTEGER NOT NULL,
        is_hard_block INTEGER NOT NULL,
        bypassed INTEGER NOT NULL,
        message TEXT NOT NULL,
        details TEXT NOT NULL, -- JSON object
        evidence TEXT,
        created_at TEXT NOT NULL,
        PRIMARY KEY(run_id, code),
        FOREIGN KEY(run_id) REFERENCES runs(id)
    )
";

pub const RUNS_DB_SCHEMA_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_runs_contract ON runs(contract_run_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_output ON runs(output_id)",
    "CREATE INDEX IF NOT EXISTS idx_validator_results_gate ON validator_results(run_id, gate_number, ord)",
];
