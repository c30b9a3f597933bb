use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::utils::error::SnifferError;

/// Inclusive bounds, in engineering units, a value must fall within.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlausibleRange {
    pub min: f32,
    pub max: f32,
}

impl PlausibleRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

fn default_scale() -> f32 {
    1.0
}

/// One entry of the register table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDef {
    pub address: u16,
    pub label: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
}

impl RegisterDef {
    pub fn new(address: u16, label: &str, unit: &str, scale: f32, range: Option<(f32, f32)>) -> Self {
        Self {
            address,
            label: label.to_string(),
            unit: unit.to_string(),
            scale,
            min: range.map(|(min, _)| min),
            max: range.map(|(_, max)| max),
        }
    }

    /// Plausible range, open-ended on a side whose bound is not configured.
    pub fn range(&self) -> Option<PlausibleRange> {
        match (self.min, self.max) {
            (None, None) => None,
            (min, max) => Some(PlausibleRange::new(
                min.unwrap_or(f32::NEG_INFINITY),
                max.unwrap_or(f32::INFINITY),
            )),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct RegisterMapFile {
    #[serde(default)]
    meter: String,
    registers: Vec<RegisterDef>,
}

/// Label used for registers the table does not know.
pub fn fallback_label(register: u16) -> String {
    format!("Register 0x{:04X}", register)
}

/// Immutable register → (label, unit, scale, range) table.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    model: String,
    by_address: BTreeMap<u16, RegisterDef>,
    by_label: HashMap<String, u16>,
}

impl RegisterMap {
    /// Builds a table, rejecting duplicate addresses or labels and bad bounds.
    pub fn new(model: &str, registers: Vec<RegisterDef>) -> Result<Self, SnifferError> {
        let mut by_address = BTreeMap::new();
        let mut by_label = HashMap::new();

        for def in registers {
            if def.label.trim().is_empty() {
                return Err(SnifferError::ConfigError(format!(
                    "register 0x{:04X} has an empty label",
                    def.address
                )));
            }
            if !def.scale.is_finite() {
                return Err(SnifferError::ConfigError(format!("register '{}' has a non-finite scale", def.label)));
            }
            if let (Some(min), Some(max)) = (def.min, def.max) {
                if min > max {
                    return Err(SnifferError::ConfigError(format!(
                        "register '{}' has min {} above max {}",
                        def.label, min, max
                    )));
                }
            }
            if by_label.insert(def.label.clone(), def.address).is_some() {
                return Err(SnifferError::ConfigError(format!("duplicate register label '{}'", def.label)));
            }
            if let Some(previous) = by_address.insert(def.address, def) {
                return Err(SnifferError::ConfigError(format!(
                    "duplicate register address 0x{:04X} ('{}')",
                    previous.address, previous.label
                )));
            }
        }

        Ok(Self {
            model: model.to_string(),
            by_address,
            by_label,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SnifferError> {
        let file: RegisterMapFile = toml::from_str(content)?;
        let model = if file.meter.is_empty() { "custom".to_string() } else { file.meter };
        Self::new(&model, file.registers)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SnifferError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SnifferError::ConfigError(format!("cannot read register map {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, SnifferError> {
        let file = RegisterMapFile {
            meter: self.model.clone(),
            registers: self.by_address.values().cloned().collect(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    pub fn lookup(&self, register: u16) -> Option<&RegisterDef> {
        self.by_address.get(&register)
    }

    pub fn by_label(&self, label: &str) -> Option<&RegisterDef> {
        self.by_label.get(label).and_then(|address| self.by_address.get(address))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDef> {
        self.by_address.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
meter = "test-meter"

[[registers]]
address = 0x0100
label = "Voltage"
unit = "V"
scale = 0.1
min = 100.0
max = 300.0

[[registers]]
address = 0x0101
label = "Counter"
"#;

    #[test]
    fn test_from_toml_str() {
        let map = RegisterMap::from_toml_str(SAMPLE).unwrap();
        assert_eq!(map.model(), "test-meter");
        assert_eq!(map.len(), 2);

        let voltage = map.lookup(0x0100).unwrap();
        assert_eq!(voltage.label, "Voltage");
        assert_eq!(voltage.scale, 0.1);
        assert_eq!(voltage.range(), Some(PlausibleRange::new(100.0, 300.0)));

        let counter = map.by_label("Counter").unwrap();
        assert_eq!(counter.scale, 1.0);
        assert!(counter.unit.is_empty());
        assert!(counter.range().is_none());
    }

    #[test]
    fn test_toml_roundtrip_preserves_table() {
        let map = RegisterMap::from_toml_str(SAMPLE).unwrap();
        let again = RegisterMap::from_toml_str(&map.to_toml_string().unwrap()).unwrap();
        assert_eq!(again.iter().collect::<Vec<_>>(), map.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let defs = vec![
            RegisterDef::new(1, "Power", "W", 1.0, None),
            RegisterDef::new(2, "Power", "W", 1.0, None),
        ];
        assert!(matches!(RegisterMap::new("x", defs), Err(SnifferError::ConfigError(_))));
    }

    #[test]
    fn test_duplicate_addresses_rejected() {
        let defs = vec![
            RegisterDef::new(1, "A", "", 1.0, None),
            RegisterDef::new(1, "B", "", 1.0, None),
        ];
        assert!(RegisterMap::new("x", defs).is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let defs = vec![RegisterDef::new(1, "A", "", 1.0, Some((10.0, -10.0)))];
        assert!(RegisterMap::new("x", defs).is_err());
    }

    #[test]
    fn test_open_ended_range() {
        let mut def = RegisterDef::new(1, "Energy", "kWh", 1.0, None);
        def.min = Some(0.0);
        let range = def.range().unwrap();
        assert!(range.contains(1.0e12));
        assert!(!range.contains(-0.5));
    }

    #[test]
    fn test_fallback_label() {
        assert_eq!(fallback_label(0x2012), "Register 0x2012");
    }
}
