//! TOML config file loading, validation, and database seeding for monitored
//! areas and their decision thresholds.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::db::{AreaConfig, Db};
use crate::evaluator::{Evaluator, Thresholds};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub thresholds: ThresholdEntry,
    /// Also raise the informational `moisture_low` alert.
    #[serde(default)]
    pub report_low_moisture: bool,
    #[serde(default)]
    pub areas: Vec<AreaEntry>,
}

/// Partial threshold table. Missing fields fall back to the enclosing level
/// (global table, then built-in defaults).
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct ThresholdEntry {
    pub moisture_low: Option<f64>,
    pub moisture_high: Option<f64>,
    pub ph_min: Option<f64>,
    pub ph_max: Option<f64>,
}

impl ThresholdEntry {
    pub fn resolve(&self, base: &Thresholds) -> Thresholds {
        Thresholds {
            moisture_low: self.moisture_low.unwrap_or(base.moisture_low),
            moisture_high: self.moisture_high.unwrap_or(base.moisture_high),
            ph_min: self.ph_min.unwrap_or(base.ph_min),
            ph_max: self.ph_max.unwrap_or(base.ph_max),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AreaEntry {
    pub area_id: String,
    pub name: String,
    /// Relay driving the area's irrigation pump, if wired.
    #[serde(default)]
    pub relay_gpio_pin: Option<i64>,
    #[serde(default)]
    pub thresholds: ThresholdEntry,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<i64> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if let Err(e) = self.global_thresholds().validate() {
            errors.push(format!("thresholds: {e}"));
        }
        self.validate_areas(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_areas(&self, errors: &mut Vec<String>) {
        let global = self.global_thresholds();
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();

        for (i, a) in self.areas.iter().enumerate() {
            let ctx = || {
                if a.area_id.is_empty() {
                    format!("areas[{i}]")
                } else {
                    format!("area '{}'", a.area_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if a.area_id.trim().is_empty() {
                errors.push(format!("{}: area_id is empty", ctx()));
            } else if a.area_id.contains(['/', '+', '#']) {
                errors.push(format!(
                    "{}: area_id must not contain MQTT topic characters '/', '+' or '#'",
                    ctx()
                ));
            } else if !seen_ids.insert(&a.area_id) {
                errors.push(format!("{}: duplicate area_id", ctx()));
            }

            if a.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }

            // ── Thresholds ──────────────────────────────────────
            if let Err(e) = a.thresholds.resolve(&global).validate() {
                errors.push(format!("{}: {e}", ctx()));
            }

            // ── Relay pin ───────────────────────────────────────
            if let Some(pin) = a.relay_gpio_pin {
                if !VALID_GPIO_PINS.contains(&pin) {
                    errors.push(format!(
                        "{}: relay_gpio_pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)",
                        ctx()
                    ));
                } else if !seen_pins.insert(pin) {
                    errors.push(format!(
                        "{}: relay_gpio_pin {pin} is already used by another area",
                        ctx()
                    ));
                }
            }
        }
    }

    pub fn global_thresholds(&self) -> Thresholds {
        self.thresholds.resolve(&Thresholds::default())
    }

    /// Build the evaluator for one area from the global and per-area tables.
    pub fn evaluator_for(&self, area: &AreaEntry) -> Result<Evaluator> {
        let thresholds = area.thresholds.resolve(&self.global_thresholds());
        let evaluator = Evaluator::new(thresholds)
            .with_context(|| format!("area '{}': invalid thresholds", area.area_id))?;
        Ok(evaluator.with_low_moisture_alerts(self.report_low_moisture))
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Upsert all areas from the config into the database.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for a in &config.areas {
        db.upsert_area(&AreaConfig {
            area_id: a.area_id.clone(),
            name: a.name.clone(),
            relay_gpio_pin: a.relay_gpio_pin,
        })
        .await
        .with_context(|| format!("failed to upsert area '{}'", a.area_id))?;
    }

    tracing::info!(areas = config.areas.len(), "config applied");

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
