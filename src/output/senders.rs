use async_trait::async_trait;
use log::{debug, error, info};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::fs;

use crate::output::formatters::{DataFormatter, JsonFormatter};
use crate::output::record::PublishRecord;
use crate::utils::error::SnifferError;

#[async_trait]
pub trait DataSender: Send + Sync {
    async fn send(&self, record: &PublishRecord) -> Result<(), SnifferError>;
    fn sender_type(&self) -> &str;
    fn destination(&self) -> &str;
}

pub struct ConsoleSender {
    formatter: Box<dyn DataFormatter>,
}

impl ConsoleSender {
    pub fn new(formatter: Box<dyn DataFormatter>) -> Self {
        Self { formatter }
    }
}

#[async_trait]
impl DataSender for ConsoleSender {
    async fn send(&self, record: &PublishRecord) -> Result<(), SnifferError> {
        println!("{}", self.formatter.format_record(record));
        Ok(())
    }

    fn sender_type(&self) -> &str {
        "console"
    }

    fn destination(&self) -> &str {
        "stdout"
    }
}

/// Writes one JSON document per line.
pub struct FileSender {
    file_path: String,
    append: bool,
    formatter: JsonFormatter,
}

impl FileSender {
    pub fn new<P: AsRef<Path>>(file_path: P, append: bool) -> Self {
        Self {
            file_path: file_path.as_ref().to_string_lossy().to_string(),
            append,
            formatter: JsonFormatter::new(),
        }
    }
}

#[async_trait]
impl DataSender for FileSender {
    async fn send(&self, record: &PublishRecord) -> Result<(), SnifferError> {
        let line = self.formatter.format_record(record);
        debug!("📝 Writing {} bytes to {}", line.len(), self.file_path);

        if self.append {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)
                .map_err(|e| {
                    error!("❌ Failed to open file {}: {}", self.file_path, e);
                    SnifferError::PublishError(format!("File open error: {}", e))
                })?;

            writeln!(file, "{}", line).map_err(|e| {
                error!("❌ Failed to write to file {}: {}", self.file_path, e);
                SnifferError::PublishError(format!("File write error: {}", e))
            })?;
        } else {
            fs::write(&self.file_path, format!("{}\n", line)).await.map_err(|e| {
                error!("❌ Failed to write to file {}: {}", self.file_path, e);
                SnifferError::PublishError(format!("File write error: {}", e))
            })?;
        }

        Ok(())
    }

    fn sender_type(&self) -> &str {
        "file"
    }

    fn destination(&self) -> &str {
        &self.file_path
    }
}

#[cfg(feature = "mqtt")]
pub use mqtt::MqttSender;

#[cfg(feature = "mqtt")]
mod mqtt {
    use super::*;
    use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
    use std::time::Duration;

    use crate::config::settings::MqttOutputConfig;

    /// Publishes each record as a compact JSON payload to one topic.
    pub struct MqttSender {
        client: AsyncClient,
        topic: String,
        qos: QoS,
        retain: bool,
        broker: String,
        formatter: JsonFormatter,
    }

    fn qos_from_level(level: u8) -> QoS {
        match level {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    impl MqttSender {
        /// Must be called inside a tokio runtime; the event loop runs as a spawned task
        /// and reconnects on its own.
        pub fn connect(config: &MqttOutputConfig) -> Self {
            let client_id = config.effective_client_id();
            let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
            options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));

            if let Some(user) = &config.username {
                options.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
            }

            let (client, mut eventloop) = AsyncClient::new(options, 10);
            let broker = format!("{}:{}", config.host, config.port);

            let log_broker = broker.clone();
            tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("📻 Connected to MQTT broker {}", log_broker);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("❌ MQTT connection to {} failed: {}", log_broker, e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });

            info!("📻 MQTT output {} as '{}' on topic {}", broker, client_id, config.topic);
            Self {
                client,
                topic: config.topic.clone(),
                qos: qos_from_level(config.qos),
                retain: config.retain,
                broker,
                formatter: JsonFormatter::new(),
            }
        }

        pub fn broker(&self) -> &str {
            &self.broker
        }
    }

    #[async_trait]
    impl DataSender for MqttSender {
        async fn send(&self, record: &PublishRecord) -> Result<(), SnifferError> {
            let payload = self.formatter.format_record(record);
            self.client
                .publish(self.topic.as_str(), self.qos, self.retain, payload.into_bytes())
                .await?;
            debug!("📻 Published {} values to {}", record.len(), self.topic);
            Ok(())
        }

        fn sender_type(&self) -> &str {
            "mqtt"
        }

        fn destination(&self) -> &str {
            &self.topic
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::record::PublishedValue;
    use std::collections::BTreeMap;

    fn record(value: f32) -> PublishRecord {
        let mut values = BTreeMap::new();
        values.insert(
            "Frequency".to_string(),
            PublishedValue {
                value,
                unit: "Hz".to_string(),
                raw: "00004248".to_string(),
            },
        );
        PublishRecord {
            timestamp: "2024-05-01T12:00:00.000Z".to_string(),
            values,
        }
    }

    #[tokio::test]
    async fn test_file_sender_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.jsonl");
        let sender = FileSender::new(&path, true);

        sender.send(&record(50.0)).await.unwrap();
        sender.send(&record(49.9)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: PublishRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, record(49.9));
        assert_eq!(sender.sender_type(), "file");
    }

    #[tokio::test]
    async fn test_file_sender_overwrite_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.json");
        let sender = FileSender::new(&path, false);

        sender.send(&record(50.0)).await.unwrap();
        sender.send(&record(49.9)).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
