use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &str) -> Result<Connection, error::GatekeeperError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::GatekeeperError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::GatekeeperError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::GatekeeperError::RusqliteError)?;
    Ok(conn)
}

pub fn runs_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(schemas::RUNS_DB_NAME)
}

pub fn initialize_runs_db(data_dir: &Path) -> Result<PathBuf, error::GatekeeperError> {
    fs::create_dir_all(data_dir).map_err(error::GatekeeperError::IoError)?;
    let db_path = runs_db_path(data_dir);

    let broker = DbBroker::new(data_dir);
    broker.with_conn(&db_path, "gatekeeper", None, "runs.init", |conn| {
        conn.execute(schemas::RUNS_DB_SCHEMA_RUNS, [])?;
        conn.execute(schemas::RUNS_DB_SCHEMA_GATE_RESULTS, [])?;
        conn.execute(schemas::RUNS_DB_SCHEMA_VALIDATOR_RESULTS, [])?;
        for index in schemas::RUNS_DB_SCHEMA_INDEXES {
            conn.execute(index, [])?;
        }
        Ok(())
    })?;
    Ok(db_path)
}
