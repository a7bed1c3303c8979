use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// Single entry point for run-store access.
/// Connections are serialized in-process and every operation lands in the audit log.
#[derive(Debug, Clone)]
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub intent_ref: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            audit_log_path: data_dir.join(AUDIT_LOG_NAME),
        }
    }

    pub fn audit_log_path(&self) -> &Path {
        &self.audit_log_path
    }

    /// Execute a closure with a serialized connection to the specified DB.
    /// `intent_ref` ties the audit event to a run id.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        intent_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::GatekeeperError>
    where
        F: FnOnce(&Connection) -> Result<R, error::GatekeeperError>,
    {
        static DB_LOCK: Mutex<()> = Mutex::new(());
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, intent_ref, op_name, &db_id, status)?;

        result
    }

    fn log_event(
        &self,
        actor: &str,
        intent_ref: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::GatekeeperError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_id(),
            actor: actor.to_string(),
            intent_ref: intent_ref.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::GatekeeperError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(error::GatekeeperError::IoError)?;
        Ok(())
    }

    /// Parsed audit log, oldest first. Missing log = no events.
    pub fn read_events(&self) -> Result<Vec<BrokerEvent>, error::GatekeeperError> {
        let raw = match std::fs::read_to_string(&self.audit_log_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(error::GatekeeperError::IoError(e)),
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(error::GatekeeperError::JsonError))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn every_operation_is_audited() {
        let tmp = tempdir().expect("tmp");
        let broker = DbBroker::new(tmp.path());
        let db_path = tmp.path().join("t.db");

        broker
            .with_conn(&db_path, "test", Some("run-1"), "t.create", |conn| {
                conn.execute("CREATE TABLE t (x INTEGER)", [])?;
                Ok(())
            })
            .expect("create");
        let failed = broker.with_conn(&db_path, "test", None, "t.bad", |conn| {
            conn.execute("INSERT INTO missing VALUES (1)", [])?;
            Ok(())
        });
        assert!(failed.is_err());

        let events = broker.read_events().expect("events");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].op, "t.create");
        assert_eq!(events[0].intent_ref.as_deref(), Some("run-1"));
        assert_eq!(events[0].status, "success");
        assert_eq!(events[1].status, "error");
        assert_eq!(events[1].db_id, "t.db");
    }
}
