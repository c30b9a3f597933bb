use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::Config;
use crate::devices::mapper::MappedMeasurement;
use crate::modbus::serial::ByteSource;
use crate::output::{formatter_for, ConsoleFormatter, ConsoleSender, DataSender, FileSender, MeasurementBatch, PublishRecord};
use crate::sniffer::SnifferEngine;
use crate::utils::error::SnifferError;

/// Chunks in flight between the reader thread and the processing loop.
const CHANNEL_CAPACITY: usize = 64;

pub struct SnifferService {
    config: Config,
    engine: SnifferEngine,
    batch: MeasurementBatch,
    senders: Vec<Box<dyn DataSender>>,
    published: u64,
}

impl SnifferService {
    /// Builds the pipeline without any output attached.
    pub fn new(config: Config) -> Result<Self, SnifferError> {
        let registers = Arc::new(config.register_map()?);
        info!("🗺️  {} registers mapped for {}", registers.len(), registers.model());

        let settings = config.sniffer_settings();
        info!(
            "👂 Sniffing master 0x{:02X}, buffer {} bytes, slave filter {:?}",
            settings.master_address, settings.buffer_size, settings.slave_ids
        );

        Ok(Self {
            engine: SnifferEngine::new(settings, registers),
            batch: MeasurementBatch::new(),
            senders: Vec::new(),
            published: 0,
            config,
        })
    }

    /// Builds the pipeline with every output the configuration enables.
    pub fn from_config(config: Config) -> Result<Self, SnifferError> {
        let mut service = Self::new(config)?;
        let output = service.config.output.clone();

        if output.console {
            let formatter = formatter_for(&output.console_format).unwrap_or_else(|| {
                warn!("⚠️  Unknown console format '{}', using console", output.console_format);
                Box::new(ConsoleFormatter)
            });
            info!("🎨 Console output ({})", formatter.name());
            service.add_sender(Box::new(ConsoleSender::new(formatter)));
        }

        if let Some(file) = &output.file_output {
            info!("📝 File output: {}", file.path);
            service.add_sender(Box::new(FileSender::new(&file.path, file.append)));
        }

        if output.mqtt_output.enabled {
            #[cfg(feature = "mqtt")]
            service.add_sender(Box::new(crate::output::MqttSender::connect(&output.mqtt_output)));
            #[cfg(not(feature = "mqtt"))]
            warn!("⚠️  MQTT output configured but this build has no MQTT support");
        }

        if service.senders.is_empty() {
            warn!("⚠️  No output enabled; measurements will only be logged");
        }
        Ok(service)
    }

    pub fn add_sender(&mut self, sender: Box<dyn DataSender>) {
        self.senders.push(sender);
    }

    pub fn engine(&self) -> &SnifferEngine {
        &self.engine
    }

    pub fn batch(&self) -> &MeasurementBatch {
        &self.batch
    }

    pub fn published_count(&self) -> u64 {
        self.published
    }

    /// Runs received bytes through the engine and keeps the accepted values.
    pub fn ingest(&mut self, bytes: &[u8]) -> Vec<MappedMeasurement> {
        let measurements = self.engine.feed(bytes);
        let accepted = self.batch.extend(&measurements);
        if !measurements.is_empty() {
            debug!("📥 {} values decoded, {} accepted", measurements.len(), accepted);
        }
        measurements
    }

    /// Sends the pending batch to every output. Nothing is sent when the
    /// batch is empty.
    pub async fn publish(&mut self) -> Option<PublishRecord> {
        let Some(record) = self.batch.take(Utc::now()) else {
            debug!("⏳ Nothing new to publish");
            return None;
        };

        for sender in &self.senders {
            if let Err(e) = sender.send(&record).await {
                error!("❌ {} output to {} failed: {}", sender.sender_type(), sender.destination(), e);
            }
        }
        self.published += 1;
        info!("📤 Published {} values ({})", record.len(), self.engine.stats().summary());
        Some(record)
    }

    /// Reads from `source` on a dedicated thread and processes its bytes until
    /// Ctrl-C or a read failure. The pending batch is flushed either way.
    pub async fn run(&mut self, source: Box<dyn ByteSource>) -> Result<(), SnifferError> {
        let description = source.describe();
        let (tx, mut rx) = mpsc::channel::<Result<Vec<u8>, SnifferError>>(CHANNEL_CAPACITY);

        std::thread::Builder::new()
            .name("bus-reader".to_string())
            .spawn(move || read_loop(source, tx))?;

        let period = Duration::from_secs(self.config.publish_interval_seconds.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!("🚀 Listening on {}, publishing every {:?}", description, period);

        let result = loop {
            tokio::select! {
                chunk = rx.recv() => match chunk {
                    Some(Ok(bytes)) => {
                        self.ingest(&bytes);
                    }
                    Some(Err(e)) => {
                        error!("❌ Reading {} failed: {}", description, e);
                        break Err(e);
                    }
                    None => {
                        break Err(SnifferError::ConnectionError(format!("{} reader stopped", description)));
                    }
                },
                _ = ticker.tick() => {
                    self.publish().await;
                }
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested");
                    break Ok(());
                }
            }
        };

        drop(rx);
        self.publish().await;
        info!("📊 Final statistics: {}", self.engine.stats().summary());
        result
    }
}

fn read_loop(mut source: Box<dyn ByteSource>, tx: mpsc::Sender<Result<Vec<u8>, SnifferError>>) {
    loop {
        match source.read() {
            Ok(bytes) if bytes.is_empty() => {
                if tx.is_closed() {
                    break;
                }
            }
            Ok(bytes) => {
                if tx.blocking_send(Ok(bytes)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
    debug!("Reader thread for {} finished", source.describe());
}
