pub mod formatters;
pub mod record;
pub mod senders;

pub use formatters::{formatter_for, ConsoleFormatter, DataFormatter, JsonFormatter};
pub use record::{MeasurementBatch, PublishRecord, PublishedValue};
pub use senders::{ConsoleSender, DataSender, FileSender};
#[cfg(feature = "mqtt")]
pub use senders::MqttSender;
