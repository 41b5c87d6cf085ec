use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::model::{Decision, OverrideState, SessionEvent};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub areas: HashMap<String, AreaState>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct AreaState {
    pub name: String,
    /// Operator override. Written by command handlers, copied out under the
    /// lock for each evaluation.
    #[serde(rename = "override")]
    pub override_state: OverrideState,
    pub last_decision: Option<Decision>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    /// Start timestamp of the currently open irrigation session.
    pub open_since: Option<i64>,
    pub pump_on: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Decision,
    Alert,
    Session,
    Override,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub areas: HashMap<String, AreaState>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    /// `areas` is a list of (area_id, display name).
    pub fn new(areas: &[(String, String)]) -> Self {
        let areas = areas
            .iter()
            .map(|(area_id, name)| {
                (
                    area_id.clone(),
                    AreaState {
                        name: name.clone(),
                        override_state: OverrideState::automatic(),
                        last_decision: None,
                        last_seen: None,
                        open_since: None,
                        pump_on: false,
                    },
                )
            })
            .collect();

        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            areas,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Current override for an area, or `None` for an unknown area.
    pub fn override_for(&self, area_id: &str) -> Option<OverrideState> {
        self.areas.get(area_id).map(|a| a.override_state)
    }

    /// Replace an area's override. Returns false for an unknown area.
    pub fn set_override(&mut self, area_id: &str, over: OverrideState) -> bool {
        let Some(area) = self.areas.get_mut(area_id) else {
            return false;
        };
        area.override_state = over;

        let detail = match (over.is_manual, over.forced_active) {
            (false, _) => format!("{area_id}: automatic mode"),
            (true, Some(true)) => format!("{area_id}: manual irrigation ON"),
            (true, _) => format!("{area_id}: manual irrigation OFF"),
        };
        self.push_event(EventKind::Override, detail);
        true
    }

    /// Last decision and current override for an area, or `None` if the
    /// area is unknown or has not reported yet.
    pub fn status_of(&self, area_id: &str) -> Option<(Decision, OverrideState)> {
        let area = self.areas.get(area_id)?;
        let decision = area.last_decision.clone()?;
        Some((decision, area.override_state))
    }

    /// Record an evaluated decision and any alerts it raised.
    pub fn record_decision(&mut self, area_id: &str, decision: &Decision) {
        if let Some(area) = self.areas.get_mut(area_id) {
            area.last_decision = Some(decision.clone());
            area.last_seen = Some(OffsetDateTime::now_utc());
        }

        let detail = format!(
            "{area_id}: irrigation {}{}",
            if decision.irrigation_active { "ON" } else { "OFF" },
            if decision.critical { " (critical)" } else { "" }
        );
        self.push_event(EventKind::Decision, detail);

        for alert in &decision.alerts {
            let level = if alert.kind.is_critical() { "critical" } else { "info" };
            self.push_event(
                EventKind::Alert,
                format!("{area_id}: [{level}] {}", alert.message),
            );
        }
    }

    /// Record a session opening or closing.
    pub fn record_session(&mut self, area_id: &str, event: &SessionEvent) {
        let detail = match event {
            SessionEvent::Opened(s) => {
                if let Some(area) = self.areas.get_mut(area_id) {
                    area.open_since = Some(s.start_timestamp);
                }
                format!("{area_id}: irrigation session started at {}", s.start_timestamp)
            }
            SessionEvent::Closed(s) => {
                if let Some(area) = self.areas.get_mut(area_id) {
                    area.open_since = None;
                }
                format!(
                    "{area_id}: irrigation session ended after {}s ({:.1} min)",
                    s.duration_secs.unwrap_or_default(),
                    s.duration_minutes().unwrap_or_default()
                )
            }
        };
        self.push_event(EventKind::Session, detail);
    }

    pub fn record_pump(&mut self, area_id: &str, on: bool) {
        if let Some(area) = self.areas.get_mut(area_id) {
            area.pump_on = on;
        }
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            areas: self.areas.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Alert, AlertKind, Session};

    fn state() -> SystemState {
        SystemState::new(&[("a1".to_string(), "North field".to_string())])
    }

    #[test]
    fn new_areas_start_automatic() {
        let st = state();
        assert_eq!(st.override_for("a1"), Some(OverrideState::automatic()));
        assert_eq!(st.override_for("zz"), None);
    }

    #[test]
    fn set_override_unknown_area() {
        let mut st = state();
        assert!(!st.set_override("zz", OverrideState::manual(true)));
        assert!(st.events.is_empty());
    }

    #[test]
    fn set_override_records_event() {
        let mut st = state();
        assert!(st.set_override("a1", OverrideState::manual(true)));
        assert_eq!(st.override_for("a1"), Some(OverrideState::manual(true)));
        let ev = st.events.back().unwrap();
        assert_eq!(ev.kind, EventKind::Override);
        assert_eq!(ev.detail, "a1: manual irrigation ON");
    }

    #[test]
    fn status_of_reflects_override_after_decision() {
        let mut st = state();
        assert_eq!(st.status_of("a1"), None);

        let d = Decision {
            needs_irrigation: false,
            critical: false,
            irrigation_active: false,
            alerts: vec![],
            source_timestamp: 42,
        };
        st.record_decision("a1", &d);
        assert!(st.set_override("a1", OverrideState::manual(true)));

        let (decision, over) = st.status_of("a1").unwrap();
        assert_eq!(decision, d);
        assert_eq!(over, OverrideState::manual(true));
        assert_eq!(st.status_of("zz"), None);

        let json = serde_json::to_value(crate::mqtt::StatusMsg::new(&decision, over)).unwrap();
        assert_eq!(json["manual"], true);
        assert_eq!(json["ts"], 42);
    }

    #[test]
    fn record_decision_pushes_alert_events() {
        let mut st = state();
        let d = Decision {
            needs_irrigation: false,
            critical: true,
            irrigation_active: false,
            alerts: vec![Alert {
                kind: AlertKind::PotassiumLow,
                message: "potassium level inadequate".into(),
            }],
            source_timestamp: 10,
        };
        st.record_decision("a1", &d);
        assert_eq!(st.events.len(), 2);
        assert_eq!(st.events[0].detail, "a1: irrigation OFF (critical)");
        assert_eq!(st.events[1].kind, EventKind::Alert);
        assert_eq!(st.events[1].detail, "a1: [critical] potassium level inadequate");
        assert!(st.areas["a1"].last_seen.is_some());
    }

    #[test]
    fn record_session_tracks_open_since() {
        let mut st = state();
        st.record_session("a1", &SessionEvent::Opened(Session::open(100)));
        assert_eq!(st.areas["a1"].open_since, Some(100));
        st.record_session("a1", &SessionEvent::Closed(Session::open(100).close(160).unwrap()));
        assert_eq!(st.areas["a1"].open_since, None);
        assert!(st.events.back().unwrap().detail.contains("after 60s"));
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let mut st = state();
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn status_lists_newest_event_first() {
        let mut st = state();
        st.record_system("first".into());
        st.record_system("second".into());
        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["areas"]["a1"]["override"]["is_manual"], false);
    }
}
