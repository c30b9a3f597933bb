//! Chint DTSU666 three-phase energy meter, as polled by the inverter master.
//!
//! The inverter reads one 22-value float block starting at 0x2000. Values are
//! addressed by chunk index from the request's start register. The last four
//! values have no known meaning and are left to the fallback labels.

use super::register_map::{RegisterDef, RegisterMap};
use super::traits::Meter;
use crate::utils::error::SnifferError;

pub const DTSU666_BLOCK_START: u16 = 0x2000;

const VOLTAGE: (f32, f32) = (150.0, 300.0);
const CURRENT: (f32, f32) = (-100.0, 100.0);
const POWER: (f32, f32) = (-50_000.0, 50_000.0);
const ENERGY: (f32, f32) = (0.0, 1.0e9);
const PERCENT: (f32, f32) = (0.0, 100.0);

/// (label, unit, plausible range) in block order.
const BLOCK: &[(&str, &str, (f32, f32))] = &[
    ("Voltage L1", "V", VOLTAGE),
    ("Voltage L2", "V", VOLTAGE),
    ("Voltage L3", "V", VOLTAGE),
    ("Current L1", "A", CURRENT),
    ("Current L2", "A", CURRENT),
    ("Current L3", "A", CURRENT),
    ("Active Power Total", "W", POWER),
    ("Reactive Power Total", "var", POWER),
    ("Apparent Power Total", "VA", (0.0, 50_000.0)),
    ("Power Factor Total", "", (-1.0, 1.0)),
    ("Frequency", "Hz", (45.0, 65.0)),
    ("Energy Import", "kWh", ENERGY),
    ("Energy Export", "kWh", ENERGY),
    ("Reactive Energy", "kvarh", ENERGY),
    ("Max Voltage", "V", (0.0, 300.0)),
    ("Max Current", "A", (0.0, 100.0)),
    ("Voltage THD", "%", PERCENT),
    ("Current THD", "%", PERCENT),
];

pub struct Dtsu666;

impl Meter for Dtsu666 {
    fn model(&self) -> &str {
        "DTSU666"
    }

    fn description(&self) -> &str {
        "Chint DTSU666 three-phase energy meter (CDAB floats)"
    }

    fn register_map(&self) -> Result<RegisterMap, SnifferError> {
        let registers = BLOCK
            .iter()
            .enumerate()
            .map(|(i, (label, unit, range))| {
                RegisterDef::new(DTSU666_BLOCK_START + i as u16, label, unit, 1.0, Some(*range))
            })
            .collect();
        RegisterMap::new(self.model(), registers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_layout() {
        let map = Dtsu666.register_map().unwrap();
        assert_eq!(map.len(), 18);
        assert_eq!(map.lookup(0x2000).unwrap().label, "Voltage L1");
        assert_eq!(map.lookup(0x2001).unwrap().label, "Voltage L2");
        assert_eq!(map.lookup(0x2003).unwrap().label, "Current L1");
        assert_eq!(map.lookup(0x200A).unwrap().unit, "Hz");
        assert_eq!(map.lookup(0x2011).unwrap().label, "Current THD");
        assert!(map.lookup(0x2012).is_none());
    }

    #[test]
    fn test_power_may_be_negative() {
        let map = Dtsu666.register_map().unwrap();
        let range = map.by_label("Active Power Total").unwrap().range().unwrap();
        assert!(range.contains(-1234.5));
        assert!(!range.contains(-80_000.0));
    }
}
