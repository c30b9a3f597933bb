use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::devices::mapper::MappedMeasurement;

/// One labelled value as it appears in a published document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedValue {
    pub value: f32,
    pub unit: String,
    pub raw: String,
}

/// The document sent to every output on each publish tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub timestamp: String,
    pub values: BTreeMap<String, PublishedValue>,
}

impl PublishRecord {
    pub fn new(timestamp: DateTime<Utc>, values: BTreeMap<String, PublishedValue>) -> Self {
        Self {
            timestamp: format_timestamp(timestamp),
            values,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepted measurements collected between two publish ticks.
///
/// A label seen twice keeps its most recent value.
#[derive(Debug, Default)]
pub struct MeasurementBatch {
    values: BTreeMap<String, PublishedValue>,
}

impl MeasurementBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the measurement failed plausibility and was skipped.
    pub fn record(&mut self, measurement: &MappedMeasurement) -> bool {
        if !measurement.valid {
            return false;
        }
        self.values.insert(
            measurement.label.clone(),
            PublishedValue {
                value: measurement.value,
                unit: measurement.unit.clone(),
                raw: measurement.raw_hex(),
            },
        );
        true
    }

    pub fn extend<'a, I>(&mut self, measurements: I) -> usize
    where
        I: IntoIterator<Item = &'a MappedMeasurement>,
    {
        measurements.into_iter().filter(|m| self.record(m)).count()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drains the batch into a record, or `None` if nothing was collected.
    pub fn take(&mut self, timestamp: DateTime<Utc>) -> Option<PublishRecord> {
        if self.values.is_empty() {
            return None;
        }
        Some(PublishRecord::new(timestamp, std::mem::take(&mut self.values)))
    }
}
