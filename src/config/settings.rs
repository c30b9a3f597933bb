use clap::ArgMatches;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::devices::register_map::RegisterMap;
use crate::devices::traits::meter_for_model;
use crate::modbus::protocol::{DEFAULT_MASTER_ADDRESS, REQUEST_LEN, RESPONSE_OVERHEAD};
use crate::sniffer::engine::SnifferSettings;
use crate::sniffer::response::{DEFAULT_ADJACENT_WINDOW, DEFAULT_MAX_BYTE_COUNT};
use crate::sniffer::MAX_BUFFER_SIZE;
use crate::utils::error::SnifferError;

/// Picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "sniffer.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Connection settings
    pub serial_port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub parity: ParityConfig,

    // Publishing settings
    pub publish_interval_seconds: u64,
    pub debug: bool,

    pub sniffer: SnifferConfig,
    pub meter: MeterConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    pub master_address: u8,
    pub buffer_size: usize,
    pub adjacent_window: usize,
    pub max_byte_count: usize,
    pub slave_ids: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub model: String,
    /// TOML register table replacing the built-in profile.
    pub register_map: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub console: bool,
    pub console_format: String,
    pub file_output: Option<FileOutputConfig>,
    pub mqtt_output: MqttOutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutputConfig {
    pub path: String,
    #[serde(default = "default_true")]
    pub append: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttOutputConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub client_id: String,
    pub qos: u8,
    pub retain: bool,
    pub keep_alive_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

fn default_true() -> bool {
    true
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            master_address: DEFAULT_MASTER_ADDRESS,
            buffer_size: MAX_BUFFER_SIZE,
            adjacent_window: DEFAULT_ADJACENT_WINDOW,
            max_byte_count: DEFAULT_MAX_BYTE_COUNT,
            slave_ids: Vec::new(),
        }
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            model: "DTSU666".to_string(),
            register_map: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            console: true,
            console_format: "console".to_string(),
            file_output: None,
            mqtt_output: MqttOutputConfig::default(),
        }
    }
}

impl Default for MqttOutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic: "dtsu666/values".to_string(),
            client_id: "dtsu666_sniffer".to_string(),
            qos: 0,
            retain: false,
            keep_alive_seconds: 60,
        }
    }
}

impl MqttOutputConfig {
    /// Configured client id, or a unique one when left empty.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.trim().is_empty() {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("dtsu666_sniffer-{}", &suffix[..8])
        } else {
            self.client_id.clone()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Connection settings
            serial_port: default_serial_port().to_string(),
            baud_rate: 9600,
            timeout_ms: 100,
            parity: ParityConfig::None,

            // Publishing settings
            publish_interval_seconds: 5,
            debug: false,

            sniffer: SnifferConfig::default(),
            meter: MeterConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(target_os = "windows") {
        "COM1"
    } else if cfg!(target_os = "macos") {
        "/dev/tty.usbserial-0001"
    } else {
        "/dev/ttyUSB0"
    }
}

impl Config {
    /// Built-in defaults, overlaid by the config file, overlaid by CLI flags.
    pub fn load(matches: &ArgMatches) -> Result<Self, SnifferError> {
        let mut config = match matches.get_one::<String>("config") {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };
        config.apply_matches(matches);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SnifferError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SnifferError::ConfigError(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        info!("📄 Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SnifferError> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, SnifferError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Overrides fields with every flag given on the command line.
    pub fn apply_matches(&mut self, matches: &ArgMatches) {
        if let Some(port) = matches.get_one::<String>("port") {
            self.serial_port = port.clone();
        }
        if let Some(baud) = matches.get_one::<u32>("baud") {
            self.baud_rate = *baud;
        }
        if let Some(parity) = matches.get_one::<String>("parity") {
            self.parity = match parity.as_str() {
                "even" => ParityConfig::Even,
                "odd" => ParityConfig::Odd,
                _ => ParityConfig::None,
            };
        }
        if let Some(timeout) = matches.get_one::<u64>("timeout") {
            self.timeout_ms = *timeout;
        }
        if let Some(interval) = matches.get_one::<u64>("interval") {
            self.publish_interval_seconds = *interval;
        }
        if matches.get_flag("debug") {
            self.debug = true;
        }

        if let Some(master) = matches.get_one::<u8>("master") {
            self.sniffer.master_address = *master;
        }
        if let Some(size) = matches.get_one::<usize>("buffer-size") {
            self.sniffer.buffer_size = *size;
        }
        if let Some(ids) = matches.get_one::<Vec<u8>>("slave-ids") {
            self.sniffer.slave_ids = ids.clone();
        }

        if let Some(model) = matches.get_one::<String>("meter") {
            self.meter.model = model.clone();
        }
        if let Some(path) = matches.get_one::<String>("register-map") {
            self.meter.register_map = Some(path.clone());
        }

        if let Some(format) = matches.get_one::<String>("format") {
            self.output.console_format = format.clone();
        }
        if matches.get_flag("quiet") {
            self.output.console = false;
        }
        if let Some(path) = matches.get_one::<String>("output-file") {
            self.output.file_output = Some(FileOutputConfig {
                path: path.clone(),
                append: true,
            });
        }

        let mqtt = &mut self.output.mqtt_output;
        if let Some(host) = matches.get_one::<String>("mqtt-host") {
            mqtt.host = host.clone();
            mqtt.enabled = true;
        }
        if let Some(port) = matches.get_one::<u16>("mqtt-port") {
            mqtt.port = *port;
        }
        if let Some(user) = matches.get_one::<String>("mqtt-user") {
            mqtt.username = Some(user.clone());
        }
        if let Some(password) = matches.get_one::<String>("mqtt-password") {
            mqtt.password = Some(password.clone());
        }
        if let Some(topic) = matches.get_one::<String>("topic") {
            mqtt.topic = topic.clone();
        }
        if matches.get_flag("no-mqtt") {
            mqtt.enabled = false;
        }
        debug!("Effective configuration: {:?}", self);
    }

    pub fn validate(&self) -> Result<(), SnifferError> {
        let fail = |msg: String| Err(SnifferError::ConfigError(msg));

        if self.baud_rate == 0 {
            return fail("baud_rate must be positive".to_string());
        }
        if self.publish_interval_seconds == 0 {
            return fail("publish_interval_seconds must be positive".to_string());
        }
        let max = self.sniffer.max_byte_count;
        if max < 4 || max > u8::MAX as usize {
            return fail(format!("max_byte_count {} outside 4..=255", max));
        }
        let needed = REQUEST_LEN + RESPONSE_OVERHEAD + max;
        if self.sniffer.buffer_size < needed {
            return fail(format!(
                "buffer_size {} cannot hold a request and a {}-byte response ({} bytes)",
                self.sniffer.buffer_size, max, needed
            ));
        }
        if self.sniffer.slave_ids.contains(&self.sniffer.master_address) {
            return fail(format!(
                "slave_ids must not contain the master address 0x{:02X}",
                self.sniffer.master_address
            ));
        }
        let mqtt = &self.output.mqtt_output;
        if mqtt.enabled {
            if mqtt.host.trim().is_empty() || mqtt.topic.trim().is_empty() {
                return fail("MQTT output needs a host and a topic".to_string());
            }
            if mqtt.qos > 2 {
                return fail(format!("MQTT QoS {} is not 0, 1 or 2", mqtt.qos));
            }
        }
        Ok(())
    }

    pub fn sniffer_settings(&self) -> SnifferSettings {
        SnifferSettings {
            master_address: self.sniffer.master_address,
            buffer_size: self.sniffer.buffer_size,
            adjacent_window: self.sniffer.adjacent_window,
            max_byte_count: self.sniffer.max_byte_count,
            slave_ids: self.sniffer.slave_ids.clone(),
            dump_frames: self.debug,
        }
    }

    /// The configured register table file, or the meter model's built-in one.
    pub fn register_map(&self) -> Result<RegisterMap, SnifferError> {
        if let Some(path) = &self.meter.register_map {
            info!("🗺️  Loading register map from {}", path);
            return RegisterMap::from_file(path);
        }
        let meter = meter_for_model(&self.meter.model)
            .ok_or_else(|| SnifferError::ConfigError(format!("unknown meter model '{}'", self.meter.model)))?;
        info!("🗺️  Using built-in register map: {}", meter.description());
        meter.register_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::build_cli;
    use std::io::Write;

    fn matches(args: &[&str]) -> ArgMatches {
        build_cli().try_get_matches_from(args).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sniffer.master_address, 0x9F);
        assert_eq!(config.output.mqtt_output.topic, "dtsu666/values");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
baud_rate = 19200

[sniffer]
slave_ids = [1, 2]

[output.mqtt_output]
enabled = true
host = "192.168.1.149"
port = 1882
username = "user1"
password = "user1"
"#,
        )
        .unwrap();

        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.serial_port, Config::default().serial_port);
        assert_eq!(config.sniffer.slave_ids, vec![1, 2]);
        assert_eq!(config.sniffer.buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(config.output.mqtt_output.port, 1882);
        assert_eq!(config.output.mqtt_output.topic, "dtsu666/values");
    }

    #[test]
    fn test_flags_override_file_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "baud_rate = 19200\ntimeout_ms = 250\n[sniffer]\nbuffer_size = 2048").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let matches = matches(&["dtsu666-sniffer", "--config", path.as_str(), "--baud", "4800", "--slave-ids", "1,7"]);
        let config = Config::load(&matches).unwrap();

        assert_eq!(config.baud_rate, 4800); // flag beats file
        assert_eq!(config.timeout_ms, 250); // file beats default
        assert_eq!(config.sniffer.buffer_size, 2048);
        assert_eq!(config.sniffer.slave_ids, vec![1, 7]);
        assert_eq!(config.publish_interval_seconds, 5); // default
    }

    #[test]
    fn test_mqtt_host_flag_enables_publishing() {
        let mut config = Config::default();
        config.apply_matches(&matches(&["dtsu666-sniffer", "--mqtt-host", "broker.local", "--topic", "meter/x"]));
        assert!(config.output.mqtt_output.enabled);
        assert_eq!(config.output.mqtt_output.host, "broker.local");
        assert_eq!(config.output.mqtt_output.topic, "meter/x");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sniffer.toml");

        let mut config = Config::default();
        config.sniffer.slave_ids = vec![1];
        config.output.file_output = Some(FileOutputConfig {
            path: "values.jsonl".to_string(),
            append: true,
        });
        config.save_to_file(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.sniffer.buffer_size = 64;
        assert!(matches!(config.validate(), Err(SnifferError::ConfigError(_))));

        let mut config = Config::default();
        config.sniffer.slave_ids = vec![0x9F];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output.mqtt_output.enabled = true;
        config.output.mqtt_output.qos = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_register_map_selection() {
        let config = Config::default();
        assert_eq!(config.register_map().unwrap().model(), "DTSU666");

        let mut config = Config::default();
        config.meter.model = "unknown".to_string();
        assert!(config.register_map().is_err());
    }

    #[test]
    fn test_generated_client_id() {
        let mut mqtt = MqttOutputConfig::default();
        assert_eq!(mqtt.effective_client_id(), "dtsu666_sniffer");
        mqtt.client_id.clear();
        assert!(mqtt.effective_client_id().starts_with("dtsu666_sniffer-"));
    }
}
