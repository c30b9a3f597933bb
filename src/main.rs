use anyhow::{Context, Result};
use log::{error, info};

use dtsu666_sniffer::cli::{build_cli, handle_subcommands};
use dtsu666_sniffer::modbus::SerialByteSource;
use dtsu666_sniffer::{Config, SnifferService, VERSION};

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, default_level));
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = Config::load(&matches).context("invalid configuration")?;
    init_logging(config.debug);

    info!("🖥️  DTSU666 sniffer v{}", VERSION);

    if handle_subcommands(&matches, &config)? {
        return Ok(());
    }

    let source = match SerialByteSource::open(&config.serial_port, config.baud_rate, &config.parity, config.timeout_ms) {
        Ok(source) => source,
        Err(e) => {
            error!("❌ Failed to open serial port {}: {}", config.serial_port, e);
            error!("💡 Run `dtsu666-sniffer list-ports` to see what is available");
            return Err(e.into());
        }
    };

    let mut service = SnifferService::from_config(config)?;
    service.run(Box::new(source)).await?;

    info!("👋 Goodbye!");
    Ok(())
}
