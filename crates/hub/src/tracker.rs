//! Irrigation session reconstruction from the decision stream.
//!
//! The sensing side only reports the desired irrigation state per cycle.
//! Sessions are inferred from edges between consecutive decisions:
//!
//! ```text
//!            ┌──[active]──▶ OPENED(start = ts)
//! (first) ───┤
//!            └──[inactive]─▶ (nothing)
//!
//! false ──▶ true    OPENED(start = ts)
//! true  ──▶ false   CLOSED(end = ts, duration = end - start)
//! same  ──▶ same    (nothing)
//! ```
//!
//! One tracker serves exactly one monitored area. Timestamps must strictly
//! increase; a rejected call leaves the tracker untouched.

use crate::error::{MonitorError, Result};
use crate::model::{Decision, Session, SessionEvent};

#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    last_decision: Option<Decision>,
    open: Option<Session>,
}

impl SessionTracker {
    /// A tracker that has observed no decisions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tracker from persisted state after a restart.
    ///
    /// `open` must be present exactly when the last decision was active, and
    /// must not start after it.
    pub fn resume(last_decision: Option<Decision>, open: Option<Session>) -> Result<Self> {
        match (&last_decision, &open) {
            (None, Some(s)) => {
                return Err(MonitorError::InconsistentResume(format!(
                    "session open since {} but no decision recorded",
                    s.start_timestamp
                )));
            }
            (Some(d), None) if d.irrigation_active => {
                return Err(MonitorError::InconsistentResume(format!(
                    "last decision at {} is active but no session is open",
                    d.source_timestamp
                )));
            }
            (Some(d), Some(s)) => {
                if !d.irrigation_active {
                    return Err(MonitorError::InconsistentResume(format!(
                        "session open since {} but last decision at {} is inactive",
                        s.start_timestamp, d.source_timestamp
                    )));
                }
                if !s.is_open() {
                    return Err(MonitorError::InconsistentResume(format!(
                        "session starting at {} is already closed",
                        s.start_timestamp
                    )));
                }
                if s.start_timestamp > d.source_timestamp {
                    return Err(MonitorError::InconsistentResume(format!(
                        "session start {} is after last decision {}",
                        s.start_timestamp, d.source_timestamp
                    )));
                }
            }
            _ => {}
        }

        let mut tracker = Self::new();
        tracker.last_decision = last_decision;
        tracker.open = open;
        Ok(tracker)
    }

    pub fn last_decision(&self) -> Option<&Decision> {
        self.last_decision.as_ref()
    }

    pub fn open_session(&self) -> Option<&Session> {
        self.open.as_ref()
    }

    /// Consume the next decision and report the session edge it produces, if
    /// any.
    pub fn on_decision(&mut self, decision: Decision) -> Result<Option<SessionEvent>> {
        let at = decision.source_timestamp;

        let previous_active = match &self.last_decision {
            Some(last) => {
                if at <= last.source_timestamp {
                    return Err(MonitorError::OutOfOrder {
                        previous: last.source_timestamp,
                        received: at,
                    });
                }
                Some(last.irrigation_active)
            }
            None => None,
        };

        let event = match (previous_active, decision.irrigation_active) {
            // First decision, or a false -> true edge.
            (None, true) | (Some(false), true) => {
                if let Some(open) = &self.open {
                    return Err(MonitorError::SessionAlreadyOpen {
                        open_since: open.start_timestamp,
                        at,
                    });
                }
                let session = Session::open(at);
                self.open = Some(session);
                Some(SessionEvent::Opened(session))
            }
            (Some(true), false) => {
                let open = self.open.ok_or(MonitorError::NoOpenSession { at })?;
                let closed = open.close(at).ok_or(MonitorError::DurationOverflow {
                    start: open.start_timestamp,
                    end: at,
                })?;
                self.open = None;
                Some(SessionEvent::Closed(closed))
            }
            _ => None,
        };

        self.last_decision = Some(decision);
        Ok(event)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
