use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Alert, Decision, OverrideCommand, OverrideState, Snapshot};

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Inbound sensor snapshot on `tele/<area_id>/snapshot`.
#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotMsg {
    pub(crate) ts: i64,
    pub(crate) moisture_pct: f64,
    pub(crate) ph: f64,
    pub(crate) phosphorus_ok: bool,
    pub(crate) potassium_ok: bool,
}

impl SnapshotMsg {
    /// Convert to a core snapshot, rejecting non-finite readings.
    pub(crate) fn into_snapshot(self) -> Result<Snapshot, String> {
        if !self.moisture_pct.is_finite() {
            return Err(format!("moisture_pct is not a finite number: {}", self.moisture_pct));
        }
        if !self.ph.is_finite() {
            return Err(format!("ph is not a finite number: {}", self.ph));
        }
        Ok(Snapshot {
            timestamp: self.ts,
            moisture_pct: self.moisture_pct,
            ph: self.ph,
            phosphorus_ok: self.phosphorus_ok,
            potassium_ok: self.potassium_ok,
        })
    }
}

/// Outbound decision status on `status/<area_id>` (retained).
#[derive(Debug, Serialize)]
pub(crate) struct StatusMsg<'a> {
    pub(crate) ts: i64,
    pub(crate) irrigation_active: bool,
    pub(crate) needs_irrigation: bool,
    pub(crate) critical: bool,
    pub(crate) manual: bool,
    pub(crate) alerts: &'a [Alert],
}

impl<'a> StatusMsg<'a> {
    pub(crate) fn new(decision: &'a Decision, over: OverrideState) -> Self {
        Self {
            ts: decision.source_timestamp,
            irrigation_active: decision.irrigation_active,
            needs_irrigation: decision.needs_irrigation,
            critical: decision.critical,
            manual: over.is_manual,
            alerts: &decision.alerts,
        }
    }
}

/// Publish `decision` under `over` as the area's retained status. Failures
/// are logged; the next snapshot publishes again.
pub(crate) fn publish_status(client: &AsyncClient, area_id: &str, decision: &Decision, over: OverrideState) {
    match serde_json::to_vec(&StatusMsg::new(decision, over)) {
        Ok(payload) => {
            if let Err(e) = client.try_publish(status_topic(area_id), QoS::AtLeastOnce, true, payload) {
                warn!(area = %area_id, "status publish failed: {e}");
            }
        }
        Err(e) => warn!(area = %area_id, "status encode failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

pub(crate) const SNAPSHOT_FILTER: &str = "tele/+/snapshot";
pub(crate) const COMMAND_FILTER: &str = "cmd/+/irrigation";

/// Extract the middle segment of "<prefix>/<id>/<suffix>".
fn middle_segment<'a>(topic: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == prefix && parts[2] == suffix && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Extract area_id from "tele/<area_id>/snapshot".
pub(crate) fn extract_snapshot_area(topic: &str) -> Option<&str> {
    middle_segment(topic, "tele", "snapshot")
}

/// Extract area_id from "cmd/<area_id>/irrigation".
pub(crate) fn extract_command_area(topic: &str) -> Option<&str> {
    middle_segment(topic, "cmd", "irrigation")
}

pub(crate) fn status_topic(area_id: &str) -> String {
    format!("status/{area_id}")
}

/// Parse an "ON"/"OFF"/"AUTO" payload (case-insensitive, trims whitespace).
pub(crate) fn parse_override_command(payload: &[u8]) -> Result<OverrideCommand, String> {
    let s = String::from_utf8_lossy(payload);
    OverrideCommand::parse(&s).ok_or_else(|| format!("unknown irrigation command '{}'", s.trim()))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertKind;

    // -- extract_snapshot_area ----------------------------------------------

    #[test]
    fn extract_snapshot_area_valid_topic() {
        assert_eq!(extract_snapshot_area("tele/north/snapshot"), Some("north"));
    }

    #[test]
    fn extract_snapshot_area_wrong_prefix() {
        assert_eq!(extract_snapshot_area("foo/north/snapshot"), None);
    }

    #[test]
    fn extract_snapshot_area_wrong_suffix() {
        assert_eq!(extract_snapshot_area("tele/north/reading"), None);
    }

    #[test]
    fn extract_snapshot_area_segment_count() {
        assert_eq!(extract_snapshot_area("tele/snapshot"), None);
        assert_eq!(extract_snapshot_area("tele/a/b/snapshot"), None);
        assert_eq!(extract_snapshot_area(""), None);
    }

    #[test]
    fn extract_snapshot_area_empty_id() {
        assert_eq!(extract_snapshot_area("tele//snapshot"), None);
    }

    // -- extract_command_area -----------------------------------------------

    #[test]
    fn extract_command_area_valid_topic() {
        assert_eq!(extract_command_area("cmd/greenhouse/irrigation"), Some("greenhouse"));
    }

    #[test]
    fn extract_command_area_rejects_snapshot_topic() {
        assert_eq!(extract_command_area("tele/greenhouse/snapshot"), None);
    }

    #[test]
    fn status_topic_format() {
        assert_eq!(status_topic("a1"), "status/a1");
    }

    // -- parse_override_command ---------------------------------------------

    #[test]
    fn parse_override_command_variants() {
        assert_eq!(parse_override_command(b"ON"), Ok(OverrideCommand::On));
        assert_eq!(parse_override_command(b"off"), Ok(OverrideCommand::Off));
        assert_eq!(parse_override_command(b"  Auto\n"), Ok(OverrideCommand::Auto));
    }

    #[test]
    fn parse_override_command_garbage() {
        let err = parse_override_command(b"TOGGLE").unwrap_err();
        assert!(err.contains("TOGGLE"), "got: {err}");
        assert!(parse_override_command(b"").is_err());
    }

    // -- SnapshotMsg --------------------------------------------------------

    #[test]
    fn snapshot_msg_deserialize_valid() {
        let json = r#"{"ts":1700000000,"moisture_pct":25.5,"ph":6.8,"phosphorus_ok":true,"potassium_ok":false}"#;
        let msg: SnapshotMsg = serde_json::from_str(json).unwrap();
        let s = msg.into_snapshot().unwrap();
        assert_eq!(s.timestamp, 1_700_000_000);
        assert_eq!(s.moisture_pct, 25.5);
        assert!(s.phosphorus_ok);
        assert!(!s.potassium_ok);
    }

    #[test]
    fn snapshot_msg_missing_field_fails() {
        let json = r#"{"ts":1,"moisture_pct":25.5,"ph":6.8,"phosphorus_ok":true}"#;
        assert!(serde_json::from_str::<SnapshotMsg>(json).is_err());
    }

    #[test]
    fn snapshot_msg_extra_fields_ignored() {
        let json = r#"{"ts":1,"moisture_pct":1,"ph":7,"phosphorus_ok":true,"potassium_ok":true,"rssi":-70}"#;
        let msg: SnapshotMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.ts, 1);
    }

    #[test]
    fn snapshot_msg_non_finite_rejected() {
        let msg = SnapshotMsg {
            ts: 1,
            moisture_pct: f64::NAN,
            ph: 6.5,
            phosphorus_ok: true,
            potassium_ok: true,
        };
        assert!(msg.into_snapshot().unwrap_err().contains("moisture_pct"));

        let msg = SnapshotMsg {
            ts: 1,
            moisture_pct: 40.0,
            ph: f64::INFINITY,
            phosphorus_ok: true,
            potassium_ok: true,
        };
        assert!(msg.into_snapshot().unwrap_err().contains("ph"));
    }

    // -- StatusMsg ----------------------------------------------------------

    #[test]
    fn status_msg_serializes_decision() {
        let decision = Decision {
            needs_irrigation: false,
            critical: true,
            irrigation_active: true,
            alerts: vec![Alert {
                kind: AlertKind::MoistureHigh,
                message: "soil moisture 90.0% above 70.0%".into(),
            }],
            source_timestamp: 42,
        };
        let json =
            serde_json::to_value(StatusMsg::new(&decision, OverrideState::manual(true))).unwrap();
        assert_eq!(json["ts"], 42);
        assert_eq!(json["irrigation_active"], true);
        assert_eq!(json["manual"], true);
        assert_eq!(json["alerts"][0]["kind"], "moisture_high");
    }
}
