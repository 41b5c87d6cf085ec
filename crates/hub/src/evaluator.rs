//! Snapshot classification: turns one sensor snapshot plus the current
//! override into a [`Decision`].
//!
//! All threshold comparisons are strict. A reading exactly on a threshold is
//! inside the acceptable band.

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::model::{Alert, AlertKind, Decision, OverrideState, Snapshot};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub moisture_low: f64,
    pub moisture_high: f64,
    pub ph_min: f64,
    pub ph_max: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            moisture_low: 30.0,
            moisture_high: 70.0,
            ph_min: 5.5,
            ph_max: 7.0,
        }
    }
}

impl Thresholds {
    /// Check that every bound is finite and each band is non-empty.
    /// Reports every violation, not just the first.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        for (name, v) in [
            ("moisture_low", self.moisture_low),
            ("moisture_high", self.moisture_high),
            ("ph_min", self.ph_min),
            ("ph_max", self.ph_max),
        ] {
            if !v.is_finite() {
                errors.push(format!("{name} must be finite, got {v}"));
            }
        }

        if self.moisture_low >= self.moisture_high {
            errors.push(format!(
                "moisture_low ({}) must be less than moisture_high ({})",
                self.moisture_low, self.moisture_high
            ));
        }
        if self.ph_min >= self.ph_max {
            errors.push(format!(
                "ph_min ({}) must be less than ph_max ({})",
                self.ph_min, self.ph_max
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::InvalidThresholds(errors.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Evaluator {
    thresholds: Thresholds,
    report_low_moisture: bool,
}

impl Evaluator {
    pub fn new(thresholds: Thresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            report_low_moisture: false,
        })
    }

    /// Also emit the informational `moisture_low` alert (always last).
    pub fn with_low_moisture_alerts(mut self, enabled: bool) -> Self {
        self.report_low_moisture = enabled;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Classify `snapshot`. Fails only when the override is manual without a
    /// forced state.
    pub fn evaluate(&self, snapshot: &Snapshot, over: OverrideState) -> Result<Decision> {
        let t = &self.thresholds;
        let m = snapshot.moisture_pct;
        let ph = snapshot.ph;

        let needs_irrigation = m < t.moisture_low;

        let moisture_high = m > t.moisture_high;
        let ph_low = ph < t.ph_min;
        let ph_high = ph > t.ph_max;
        let critical = moisture_high
            || ph_low
            || ph_high
            || !snapshot.phosphorus_ok
            || !snapshot.potassium_ok;

        // Fixed order keeps output deterministic.
        let mut alerts = Vec::new();
        if moisture_high {
            alerts.push(Alert {
                kind: AlertKind::MoistureHigh,
                message: format!(
                    "soil moisture {m:.1}% above {:.1}%",
                    t.moisture_high
                ),
            });
        }
        if ph_low {
            alerts.push(Alert {
                kind: AlertKind::PhLow,
                message: format!("soil pH {ph:.2} below {:.2}", t.ph_min),
            });
        }
        if ph_high {
            alerts.push(Alert {
                kind: AlertKind::PhHigh,
                message: format!("soil pH {ph:.2} above {:.2}", t.ph_max),
            });
        }
        if !snapshot.phosphorus_ok {
            alerts.push(Alert {
                kind: AlertKind::PhosphorusLow,
                message: "phosphorus level inadequate".to_string(),
            });
        }
        if !snapshot.potassium_ok {
            alerts.push(Alert {
                kind: AlertKind::PotassiumLow,
                message: "potassium level inadequate".to_string(),
            });
        }
        if needs_irrigation && self.report_low_moisture {
            alerts.push(Alert {
                kind: AlertKind::MoistureLow,
                message: format!("soil moisture {m:.1}% below {:.1}%", t.moisture_low),
            });
        }

        let irrigation_active = if over.is_manual {
            over.forced_active.ok_or(MonitorError::MissingForcedState)?
        } else {
            // Any critical condition suppresses irrigation.
            needs_irrigation && !critical
        };

        Ok(Decision {
            needs_irrigation,
            critical,
            irrigation_active,
            alerts,
            source_timestamp: snapshot.timestamp,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
