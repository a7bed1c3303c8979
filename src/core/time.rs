//! Timestamps and ids for run records, and the envelope around JSON CLI output.

use crate::core::error::GatekeeperError;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Epoch seconds with a `Z` suffix (`1771220592Z`), the form every stored
/// timestamp takes. Instants before the epoch clamp to `0Z`.
pub fn epoch_z(at: SystemTime) -> String {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    format!("{}Z", secs)
}

pub fn now_epoch_z() -> String {
    epoch_z(SystemTime::now())
}

/// ULID, so run ids sort by creation time.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

#[derive(Serialize)]
struct Envelope<'a> {
    gatekeeper: &'a str,
    ts: String,
    cmd: &'a str,
    status: &'a str,
    #[serde(flatten)]
    body: Map<String, JsonValue>,
}

/// `--format json` output: the fields of `body` next to the command, its
/// status, a timestamp and the gatekeeper version. A non-object `body` is
/// placed under `data`.
pub fn command_envelope(
    cmd: &str,
    status: &str,
    body: JsonValue,
) -> Result<JsonValue, GatekeeperError> {
    let body = match body {
        JsonValue::Object(map) => map,
        other => Map::from_iter([("data".to_string(), other)]),
    };
    let envelope = Envelope {
        gatekeeper: env!("CARGO_PKG_VERSION"),
        ts: now_epoch_z(),
        cmd,
        status,
        body,
    };
    Ok(serde_json::to_value(envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn epoch_z_formats_and_clamps() {
        let at = UNIX_EPOCH + Duration::from_secs(1_771_220_592);
        assert_eq!(epoch_z(at), "1771220592Z");
        assert_eq!(epoch_z(UNIX_EPOCH - Duration::from_secs(5)), "0Z");
        assert!(now_epoch_z().trim_end_matches('Z').parse::<u64>().is_ok());
    }

    #[test]
    fn run_ids_are_ulids() {
        let id = new_id();
        assert_ne!(id, new_id());
        assert!(Ulid::from_string(&id).is_ok());
    }

    #[test]
    fn envelope_flattens_object_bodies() {
        let envelope =
            command_envelope("run", "PASSED", json!({ "runId": "r1" })).expect("envelope");
        assert_eq!(envelope["cmd"], "run");
        assert_eq!(envelope["status"], "PASSED");
        assert_eq!(envelope["runId"], "r1");
        assert_eq!(envelope["gatekeeper"], env!("CARGO_PKG_VERSION"));
        assert!(envelope["ts"].as_str().is_some_and(|t| t.ends_with('Z')));
    }

    #[test]
    fn envelope_wraps_other_bodies_under_data() {
        let envelope = command_envelope("validators", "PASSED", json!(["A", "B"])).expect("envelope");
        assert_eq!(envelope["data"], json!(["A", "B"]));
    }
}
