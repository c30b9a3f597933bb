use log::warn;
use std::sync::Arc;

use super::mapper::MappedMeasurement;
use super::register_map::RegisterMap;

/// Range-checks measurements against the register table.
pub struct PlausibilityFilter {
    registers: Arc<RegisterMap>,
}

impl PlausibilityFilter {
    pub fn new(registers: Arc<RegisterMap>) -> Self {
        Self { registers }
    }

    /// Non-finite values never pass; labels without a range accept any finite value.
    pub fn check(&self, measurement: &MappedMeasurement) -> bool {
        if !measurement.value.is_finite() {
            return false;
        }
        self.registers
            .by_label(&measurement.label)
            .and_then(|def| def.range())
            .map_or(true, |range| range.contains(measurement.value))
    }

    /// Marks every measurement's `valid` flag and returns how many failed.
    pub fn apply(&self, measurements: &mut [MappedMeasurement]) -> usize {
        let mut rejected = 0;
        for measurement in measurements.iter_mut() {
            measurement.valid = self.check(measurement);
            if !measurement.valid {
                rejected += 1;
                warn!("🚫 Implausible value dropped: {}", measurement);
            }
        }
        rejected
    }
}
