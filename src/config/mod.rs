pub mod settings;

pub use settings::{
    Config,
    FileOutputConfig,
    MeterConfig,
    MqttOutputConfig,
    OutputConfig,
    ParityConfig,
    SnifferConfig,
    DEFAULT_CONFIG_FILE,
};
