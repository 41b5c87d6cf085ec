//! Pump relays per monitored area, driven by each decision's
//! `irrigation_active`. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation logs state changes.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{info, warn};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO relay board (production: rppal on Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct PumpBoard {
    pins: HashMap<String, OutputPin>, // area_id -> GPIO pin
    active_low: bool,                 // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl PumpBoard {
    pub(crate) fn new(area_to_gpio: &[(String, u8)], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for (area_id, pin_num) in area_to_gpio {
            let mut pin = gpio.get(*pin_num)?.into_output();

            // Fail-safe: pump off at startup
            if active_low {
                pin.set_high();
            } else {
                pin.set_low();
            }

            pins.insert(area_id.clone(), pin);
        }

        Ok(Self { pins, active_low })
    }

    /// Returns false if the area has no relay.
    pub(crate) fn set(&mut self, area_id: &str, on: bool) -> bool {
        let Some(pin) = self.pins.get_mut(area_id) else {
            return false;
        };
        // active-low: LOW = ON. active-high: HIGH = ON.
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        info!(area = %area_id, on, "pump relay set");
        true
    }

    pub(crate) fn all_off(&mut self) {
        let keys: Vec<String> = self.pins.keys().cloned().collect();
        for k in keys {
            self.set(&k, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (development: no hardware, logs state)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct PumpBoard {
    pub(super) pumps: HashMap<String, bool>, // area_id -> on/off state
}

#[cfg(not(feature = "gpio"))]
impl PumpBoard {
    pub(crate) fn new(area_to_gpio: &[(String, u8)], _active_low: bool) -> Result<Self> {
        let mut pumps = HashMap::new();
        for (area_id, pin_num) in area_to_gpio {
            info!(area = %area_id, gpio = pin_num, "[mock-gpio] pump registered (not wired)");
            pumps.insert(area_id.clone(), false);
        }
        Ok(Self { pumps })
    }

    /// Returns false if the area has no relay.
    pub(crate) fn set(&mut self, area_id: &str, on: bool) -> bool {
        let Some(state) = self.pumps.get_mut(area_id) else {
            return false;
        };
        if *state != on {
            info!(area = %area_id, on, "[mock-gpio] pump relay set");
        }
        *state = on;
        true
    }

    pub(crate) fn all_off(&mut self) {
        if self.pumps.values().any(|on| *on) {
            warn!("[mock-gpio] switching all pumps off");
        }
        for state in self.pumps.values_mut() {
            *state = false;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    #[test]
    fn pump_board_registers_areas_off() {
        let areas = vec![("a1".to_string(), 17), ("a2".to_string(), 27)];
        let board = PumpBoard::new(&areas, true).unwrap();
        assert_eq!(board.pumps.len(), 2);
        assert!(board.pumps.values().all(|on| !on));
    }

    #[test]
    fn pump_board_follows_decisions() {
        let areas = vec![("a1".to_string(), 17)];
        let mut board = PumpBoard::new(&areas, true).unwrap();
        assert!(board.set("a1", true));
        assert!(board.pumps["a1"]);
        assert!(board.set("a1", false));
        assert!(!board.pumps["a1"]);
    }

    #[test]
    fn pump_board_all_off() {
        let areas = vec![("a1".to_string(), 17), ("a2".to_string(), 27)];
        let mut board = PumpBoard::new(&areas, true).unwrap();
        board.set("a1", true);
        board.set("a2", true);
        board.all_off();
        assert!(!board.pumps["a1"]);
        assert!(!board.pumps["a2"]);
    }

    #[test]
    fn pump_board_area_without_relay() {
        let areas = vec![("a1".to_string(), 17)];
        let mut board = PumpBoard::new(&areas, true).unwrap();
        assert!(!board.set("greenhouse", true));
        assert_eq!(board.pumps.len(), 1);
    }
}
