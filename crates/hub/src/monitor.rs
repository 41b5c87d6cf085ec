//! Per-area pipeline: evaluate a snapshot, then feed the decision to that
//! area's session tracker.

use std::collections::HashMap;

use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::model::{Decision, OverrideState, SessionEvent, Snapshot};
use crate::tracker::SessionTracker;

/// Result of processing one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub decision: Decision,
    pub event: Option<SessionEvent>,
}

/// Evaluator plus session state for a single monitored area. Snapshots for
/// the area must be delivered to the same instance, in order.
#[derive(Debug)]
pub struct AreaMonitor {
    area_id: String,
    evaluator: Evaluator,
    tracker: SessionTracker,
}

impl AreaMonitor {
    pub fn with_tracker(
        area_id: impl Into<String>,
        evaluator: Evaluator,
        tracker: SessionTracker,
    ) -> Self {
        Self {
            area_id: area_id.into(),
            evaluator,
            tracker,
        }
    }

    pub fn area_id(&self) -> &str {
        &self.area_id
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Put back a tracker saved before `process`, when its outcome could
    /// not be stored.
    pub fn restore_tracker(&mut self, tracker: SessionTracker) {
        self.tracker = tracker;
    }

    /// Evaluate `snapshot` under `over` and advance the session tracker.
    /// On error nothing is recorded.
    pub fn process(&mut self, snapshot: &Snapshot, over: OverrideState) -> Result<Outcome> {
        let decision = self.evaluator.evaluate(snapshot, over)?;
        let event = self.tracker.on_decision(decision.clone())?;
        Ok(Outcome { decision, event })
    }
}

/// Routes snapshots to the monitor of their area.
pub type Monitors = HashMap<String, AreaMonitor>;
