use std::fmt;

use super::decoder::{DecodedValue, VALUE_LEN};
use super::register_map::{fallback_label, RegisterMap};
use crate::modbus::protocol::RequestFrame;

/// A decoded value with its meaning attached.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedMeasurement {
    pub register: u16,
    pub label: String,
    pub unit: String,
    /// Scaled value, in `unit`.
    pub value: f32,
    pub raw: [u8; VALUE_LEN],
    /// Cleared by the plausibility filter.
    pub valid: bool,
}

impl MappedMeasurement {
    pub fn raw_hex(&self) -> String {
        hex::encode(self.raw)
    }
}

impl fmt::Display for MappedMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:.3}", self.label, self.value)?;
        if !self.unit.is_empty() {
            write!(f, " {}", self.unit)?;
        }
        write!(f, " [0x{:04X} raw {}]", self.register, self.raw_hex())
    }
}

/// Attaches label, unit and scale to each value via `start_register + index`.
///
/// Unknown registers get a fallback label, scale 1 and no unit.
pub fn map(decoded: &[DecodedValue], request: &RequestFrame, registers: &RegisterMap) -> Vec<MappedMeasurement> {
    decoded
        .iter()
        .map(|value| {
            let register = value.register_offset(request.start_register);
            match registers.lookup(register) {
                Some(def) => MappedMeasurement {
                    register,
                    label: def.label.clone(),
                    unit: def.unit.clone(),
                    value: value.value * def.scale,
                    raw: value.raw,
                    valid: true,
                },
                None => MappedMeasurement {
                    register,
                    label: fallback_label(register),
                    unit: String::new(),
                    value: value.value,
                    raw: value.raw,
                    valid: true,
                },
            }
        })
        .collect()
}
