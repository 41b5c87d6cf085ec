//! Stateful soil sensor simulator for local development.
//!
//! Models a single monitored area:
//! - Moisture as a random walk with mean reversion and a drying drift
//! - Closed-loop irrigation response (moisture rises while the pump runs)
//! - Slowly wandering soil pH
//! - Phosphorus/potassium adequacy drawn independently per sample

use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let p = 10f64.powi(decimals);
    (v * p).round() / p
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries out steadily until irrigation kicks in.
    Drying,
    /// Hovers near the centre with healthy chemistry. Nothing should fire.
    Stable,
    /// Normal moisture but pH settles below the usual 5.5 floor.
    Acidic,
    /// Nutrients are mostly inadequate, so the hub raises critical alerts.
    Depleted,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "acidic" => Self::Acidic,
            "depleted" => Self::Depleted,
            _ => Self::Drying, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Acidic => write!(f, "acidic"),
            Self::Depleted => write!(f, "depleted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire message
// ---------------------------------------------------------------------------

/// Payload published on `tele/<area_id>/snapshot`.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMsg {
    pub ts: i64,
    pub moisture_pct: f64,
    pub ph: f64,
    pub phosphorus_ok: bool,
    pub potassium_ok: bool,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

const PH_MIN: f64 = 4.0;
const PH_MAX: f64 = 8.0;

/// Stateful simulator producing soil snapshots for one area.
pub struct SoilSim {
    moisture: f64,
    ph: f64,

    // Moisture walk
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,

    // pH walk
    ph_center: f64,
    ph_sigma: f64,
    ph_reversion: f64,

    /// Probability that each nutrient reads adequate.
    nutrient_ok_prob: f64,

    // Irrigation response
    irrigating: bool,
    wet_rate: f64,
}

impl SoilSim {
    pub fn new(scenario: Scenario) -> Self {
        // (start %, drift, walk sigma, reversion, pH start, pH centre, nutrient p)
        let (start, drift, walk_sigma, mean_rev, ph_start, ph_center, nutrient_ok_prob) =
            match scenario {
                Scenario::Drying => (50.0, -0.8, 0.8, 0.02, 6.5, 6.5, 0.7),
                Scenario::Stable => (50.0, 0.0, 0.4, 0.05, 6.5, 6.5, 0.95),
                Scenario::Acidic => (50.0, 0.0, 0.5, 0.05, 5.6, 4.8, 0.7),
                Scenario::Depleted => (45.0, -0.2, 0.5, 0.05, 6.4, 6.4, 0.2),
            };

        Self {
            moisture: start + gaussian(0.0, 2.0),
            ph: ph_start,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            center: 50.0,
            ph_center,
            ph_sigma: 0.05,
            ph_reversion: 0.1,
            nutrient_ok_prob,
            irrigating: false,
            wet_rate: 3.0,
        }
    }

    /// Inform the simulator whether the area's pump is currently running.
    pub fn set_irrigating(&mut self, active: bool) {
        self.irrigating = active;
    }

    pub fn irrigating(&self) -> bool {
        self.irrigating
    }

    /// Advance one tick and produce the snapshot stamped `ts`.
    pub fn sample(&mut self, ts: i64) -> SnapshotMsg {
        let pull = self.mean_reversion * (self.center - self.moisture);
        let walk = gaussian(0.0, self.walk_sigma);
        let wet = if self.irrigating { self.wet_rate } else { 0.0 };
        self.moisture =
            (self.moisture + self.drift_per_sample + pull + walk + wet).clamp(0.0, 100.0);

        let ph_pull = self.ph_reversion * (self.ph_center - self.ph);
        self.ph = (self.ph + ph_pull + gaussian(0.0, self.ph_sigma)).clamp(PH_MIN, PH_MAX);

        SnapshotMsg {
            ts,
            moisture_pct: round_to(self.moisture, 1),
            ph: round_to(self.ph, 2),
            phosphorus_ok: fastrand::f64() < self.nutrient_ok_prob,
            potassium_ok: fastrand::f64() < self.nutrient_ok_prob,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
