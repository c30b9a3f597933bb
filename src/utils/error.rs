use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnifferError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("CRC checksum mismatch")]
    CrcError,

    #[error("Incomplete frame: need {needed} bytes, have {available}")]
    IncompleteFrame { needed: usize, available: usize },

    #[error("Malformed payload: {0} bytes is not a positive multiple of 4")]
    MalformedPayload(usize),

    #[error("Unsupported function code: 0x{0:02X}")]
    UnsupportedFunction(u8),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Publish error: {0}")]
    PublishError(String),
}

impl From<serde_json::Error> for SnifferError {
    fn from(err: serde_json::Error) -> Self {
        SnifferError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for SnifferError {
    fn from(err: std::io::Error) -> Self {
        SnifferError::CommunicationError(format!("IO error: {}", err))
    }
}

impl From<serialport::Error> for SnifferError {
    fn from(err: serialport::Error) -> Self {
        SnifferError::ConnectionError(format!("Serial port error: {}", err))
    }
}

impl From<toml::de::Error> for SnifferError {
    fn from(err: toml::de::Error) -> Self {
        SnifferError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for SnifferError {
    fn from(err: toml::ser::Error) -> Self {
        SnifferError::SerializationError(format!("TOML error: {}", err))
    }
}

impl From<hex::FromHexError> for SnifferError {
    fn from(err: hex::FromHexError) -> Self {
        SnifferError::InvalidData(format!("Hex decode error: {}", err))
    }
}

#[cfg(feature = "mqtt")]
impl From<rumqttc::ClientError> for SnifferError {
    fn from(err: rumqttc::ClientError) -> Self {
        SnifferError::PublishError(format!("MQTT client error: {}", err))
    }
}
