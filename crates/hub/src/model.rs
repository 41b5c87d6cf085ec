//! Value types shared by the evaluator, the session tracker and the
//! surrounding collaborators (storage, MQTT, web API).
//!
//! Timestamps are Unix seconds. Durations are whole seconds.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One sensor reading cycle for a monitored area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    /// Soil moisture in percent. Expected in 0..=100 but never clamped.
    pub moisture_pct: f64,
    pub ph: f64,
    pub phosphorus_ok: bool,
    pub potassium_ok: bool,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    MoistureHigh,
    PhLow,
    PhHigh,
    PhosphorusLow,
    PotassiumLow,
    /// Informational: irrigation is needed. Never critical on its own.
    MoistureLow,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MoistureHigh => "moisture_high",
            Self::PhLow => "ph_low",
            Self::PhHigh => "ph_high",
            Self::PhosphorusLow => "phosphorus_low",
            Self::PotassiumLow => "potassium_low",
            Self::MoistureLow => "moisture_low",
        }
    }

    /// Parse the storage/wire name back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moisture_high" => Some(Self::MoistureHigh),
            "ph_low" => Some(Self::PhLow),
            "ph_high" => Some(Self::PhHigh),
            "phosphorus_low" => Some(Self::PhosphorusLow),
            "potassium_low" => Some(Self::PotassiumLow),
            "moisture_low" => Some(Self::MoistureLow),
            _ => None,
        }
    }

    pub fn is_critical(&self) -> bool {
        !matches!(self, Self::MoistureLow)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Classification and actionable output for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub needs_irrigation: bool,
    pub critical: bool,
    pub irrigation_active: bool,
    pub alerts: Vec<Alert>,
    pub source_timestamp: i64,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// A contiguous interval of active irrigation, reconstructed from edges in
/// the decision stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub start_timestamp: i64,
    pub end_timestamp: Option<i64>,
    /// `end_timestamp - start_timestamp`, set when the session closes.
    pub duration_secs: Option<i64>,
}

impl Session {
    pub fn open(start_timestamp: i64) -> Self {
        Self {
            start_timestamp,
            end_timestamp: None,
            duration_secs: None,
        }
    }

    /// Close the session at `end_timestamp`. Returns `None` if the duration
    /// does not fit in an `i64`.
    pub fn close(self, end_timestamp: i64) -> Option<Self> {
        let duration = end_timestamp.checked_sub(self.start_timestamp)?;
        Some(Self {
            start_timestamp: self.start_timestamp,
            end_timestamp: Some(end_timestamp),
            duration_secs: Some(duration),
        })
    }

    pub fn is_open(&self) -> bool {
        self.end_timestamp.is_none()
    }

    /// Duration in minutes, the unit irrigation history is usually reported in.
    pub fn duration_minutes(&self) -> Option<f64> {
        self.duration_secs.map(|s| s as f64 / 60.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "session", rename_all = "snake_case")]
pub enum SessionEvent {
    Opened(Session),
    Closed(Session),
}

// ---------------------------------------------------------------------------
// Manual override
// ---------------------------------------------------------------------------

/// Operator-imposed irrigation state. When `is_manual` is set,
/// `forced_active` decides `irrigation_active` regardless of thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverrideState {
    pub is_manual: bool,
    pub forced_active: Option<bool>,
}

impl OverrideState {
    pub fn automatic() -> Self {
        Self::default()
    }

    pub fn manual(active: bool) -> Self {
        Self {
            is_manual: true,
            forced_active: Some(active),
        }
    }

    pub fn mode(&self) -> &'static str {
        if self.is_manual {
            "manual"
        } else {
            "automatic"
        }
    }
}

/// Operator command as received over MQTT or the web API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideCommand {
    On,
    Off,
    Auto,
}

impl OverrideCommand {
    /// Parse "ON" / "OFF" / "AUTO" (case-insensitive, trims whitespace).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Some(Self::On),
            "OFF" => Some(Self::Off),
            "AUTO" => Some(Self::Auto),
            _ => None,
        }
    }

    /// The override state this command establishes.
    pub fn to_override(self) -> OverrideState {
        match self {
            Self::On => OverrideState::manual(true),
            Self::Off => OverrideState::manual(false),
            Self::Auto => OverrideState::automatic(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
