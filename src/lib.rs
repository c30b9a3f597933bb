//! Passive Modbus RTU sniffer for DTSU666 energy meters
//!
//! Listens to the RS485 traffic between an inverter (the bus master) and its
//! meter, pairs each read request with its response, decodes the CDAB float
//! payload into labelled measurements and publishes them periodically.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod output;
pub mod services;
pub mod sniffer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use devices::{MappedMeasurement, Meter, RegisterMap};
pub use modbus::{ByteSource, RequestFrame, ResponseFrame};
pub use output::{DataFormatter, DataSender, MeasurementBatch, PublishRecord};
pub use services::SnifferService;
pub use sniffer::{SnifferEngine, SnifferSettings, SnifferStats};
pub use utils::error::SnifferError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
