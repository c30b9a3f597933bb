use crate::devices::mapper::MappedMeasurement;
use crate::output::record::PublishRecord;

pub trait DataFormatter: Send + Sync {
    fn format_record(&self, record: &PublishRecord) -> String;
    fn format_measurement(&self, measurement: &MappedMeasurement) -> String;
    fn name(&self) -> &str;

    fn format_measurements(&self, measurements: &[MappedMeasurement]) -> String {
        measurements
            .iter()
            .map(|m| self.format_measurement(m))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct ConsoleFormatter;

impl DataFormatter for ConsoleFormatter {
    fn format_record(&self, record: &PublishRecord) -> String {
        let mut output = format!("📊 DTSU666 values @ {}\n", record.timestamp);
        output.push_str(&"═".repeat(60));
        output.push('\n');

        for (label, entry) in &record.values {
            output.push_str(&format!("  {:<24} {:>12.3} {:<6} ({})\n", label, entry.value, entry.unit, entry.raw));
        }
        output
    }

    fn format_measurement(&self, measurement: &MappedMeasurement) -> String {
        let marker = if measurement.valid { "✅" } else { "🚫" };
        format!("{} {}", marker, measurement)
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// Compact by default: one document per line.
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFormatter for JsonFormatter {
    fn format_record(&self, record: &PublishRecord) -> String {
        let result = if self.pretty {
            serde_json::to_string_pretty(record)
        } else {
            serde_json::to_string(record)
        };
        result.unwrap_or_default()
    }

    fn format_measurement(&self, measurement: &MappedMeasurement) -> String {
        let json = serde_json::json!({
            "register": format!("0x{:04X}", measurement.register),
            "label": measurement.label,
            "value": measurement.value,
            "unit": measurement.unit,
            "raw": measurement.raw_hex(),
            "valid": measurement.valid,
        });
        json.to_string()
    }

    fn name(&self) -> &str {
        "json"
    }
}

pub fn formatter_for(name: &str) -> Option<Box<dyn DataFormatter>> {
    match name.to_ascii_lowercase().as_str() {
        "console" | "text" => Some(Box::new(ConsoleFormatter)),
        "json" => Some(Box::new(JsonFormatter::new())),
        "json-pretty" => Some(Box::new(JsonFormatter::pretty())),
        _ => None,
    }
}
