use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;
use std::sync::Arc;

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::devices::decoder::{interpretations, ByteOrder, VALUE_LEN};
use crate::devices::mapper::MappedMeasurement;
use crate::modbus::serial::list_serial_ports;
use crate::output::{formatter_for, ConsoleFormatter, DataFormatter, MeasurementBatch, PublishRecord};
use crate::sniffer::{SnifferEngine, SnifferStats};
use crate::utils::error::SnifferError;

pub fn build_cli() -> Command {
    Command::new("dtsu666-sniffer")
        .version(crate::VERSION)
        .about("Passive Modbus RTU sniffer for the DTSU666 energy meter")
        .arg(global_value("config", 'c', "FILE", &format!("TOML config file [default: {} if present]", DEFAULT_CONFIG_FILE)))
        .arg(global_value("port", 'p', "PORT", "Serial port to listen on"))
        .arg(global_value("baud", 'b', "BAUD", "Baud rate").value_parser(clap::value_parser!(u32)))
        .arg(
            Arg::new("parity")
                .long("parity")
                .value_name("PARITY")
                .help("Serial parity")
                .global(true)
                .value_parser(PossibleValuesParser::new(["none", "even", "odd"])),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("MS")
                .help("Serial read timeout in milliseconds")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(global_value("interval", 'i', "SECONDS", "Publish interval").value_parser(clap::value_parser!(u64)))
        .arg(
            Arg::new("master")
                .long("master")
                .value_name("ADDR")
                .help("Address of the bus master, decimal or 0x-prefixed hex")
                .global(true)
                .value_parser(parse_address),
        )
        .arg(
            Arg::new("buffer-size")
                .long("buffer-size")
                .value_name("BYTES")
                .help("Stream buffer capacity")
                .global(true)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("slave-ids")
                .long("slave-ids")
                .value_name("IDS")
                .help("Comma separated slave addresses accepted by the last-resort search")
                .global(true)
                .value_parser(parse_slave_ids),
        )
        .arg(global_value("meter", 'm', "MODEL", "Meter model with a built-in register map"))
        .arg(
            Arg::new("register-map")
                .long("register-map")
                .value_name("FILE")
                .help("TOML register table replacing the built-in one")
                .global(true),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Console output format")
                .global(true)
                .value_parser(PossibleValuesParser::new(["console", "json", "json-pretty"])),
        )
        .arg(
            Arg::new("output-file")
                .short('o')
                .long("output-file")
                .value_name("FILE")
                .help("Append published records to a JSON lines file")
                .global(true),
        )
        .arg(
            Arg::new("mqtt-host")
                .long("mqtt-host")
                .value_name("HOST")
                .help("MQTT broker host; enables MQTT publishing")
                .global(true),
        )
        .arg(
            Arg::new("mqtt-port")
                .long("mqtt-port")
                .value_name("PORT")
                .help("MQTT broker port")
                .global(true)
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(Arg::new("mqtt-user").long("mqtt-user").value_name("USER").help("MQTT username").global(true))
        .arg(
            Arg::new("mqtt-password")
                .long("mqtt-password")
                .value_name("PASSWORD")
                .help("MQTT password")
                .global(true),
        )
        .arg(Arg::new("topic").short('t').long("topic").value_name("TOPIC").help("MQTT topic").global(true))
        .arg(global_flag("no-mqtt", "Disable MQTT publishing even if configured"))
        .arg(global_flag("quiet", "Do not print published records to stdout").short('q'))
        .arg(global_flag("debug", "Verbose logging and a dump of every matched frame pair").short('d'))
        .subcommand(Command::new("run").about("Sniff the bus and publish values (default)"))
        .subcommand(Command::new("list-ports").about("List available serial ports"))
        .subcommand(
            Command::new("decode")
                .about("Run a hex capture through the sniffer and print what it extracts")
                .arg(Arg::new("hex").value_name("HEX").help("Captured bytes as hex, whitespace allowed"))
                .arg(
                    Arg::new("input")
                        .long("input")
                        .value_name("FILE")
                        .help("Read the hex capture from a file")
                        .conflicts_with("hex"),
                ),
        )
        .subcommand(
            Command::new("interpret")
                .about("Show a payload under all four float byte orders")
                .arg(Arg::new("hex").value_name("HEX").required(true).help("Payload bytes as hex")),
        )
        .subcommand(
            Command::new("show-config")
                .about("Print the effective configuration")
                .arg(Arg::new("save").long("save").value_name("FILE").help("Also write it to FILE")),
        )
}

fn global_value(name: &'static str, short: char, value_name: &'static str, help: &str) -> Arg {
    Arg::new(name)
        .short(short)
        .long(name)
        .value_name(value_name)
        .help(help.to_string())
        .global(true)
}

fn global_flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).help(help).action(ArgAction::SetTrue).global(true)
}

fn parse_address(value: &str) -> Result<u8, String> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse::<u8>(),
    };
    parsed.map_err(|_| format!("'{}' is not a bus address (0-255)", value))
}

fn parse_slave_ids(value: &str) -> Result<Vec<u8>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_address)
        .collect()
}

/// Parses hex text, ignoring whitespace, `:` and `,` separators and `0x` prefixes.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, SnifferError> {
    let cleaned: String = text
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if cleaned.is_empty() {
        return Err(SnifferError::InvalidData("no hex bytes given".to_string()));
    }
    Ok(hex::decode(cleaned)?)
}

/// What the sniffer extracts from one offline capture.
pub struct CaptureReport {
    pub measurements: Vec<MappedMeasurement>,
    pub record: Option<PublishRecord>,
    pub stats: SnifferStats,
}

pub fn decode_capture(config: &Config, bytes: &[u8]) -> Result<CaptureReport, SnifferError> {
    let registers = Arc::new(config.register_map()?);
    let mut engine = SnifferEngine::new(config.sniffer_settings(), registers);
    let measurements = engine.feed(bytes);

    let mut batch = MeasurementBatch::new();
    batch.extend(&measurements);
    Ok(CaptureReport {
        measurements,
        record: batch.take(chrono::Utc::now()),
        stats: engine.stats().clone(),
    })
}

pub fn interpret_payload(bytes: &[u8]) -> Result<Vec<[(ByteOrder, f32); 4]>, SnifferError> {
    if bytes.is_empty() || bytes.len() % VALUE_LEN != 0 {
        return Err(SnifferError::MalformedPayload(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(VALUE_LEN)
        .map(|chunk| interpretations([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Executes a utility subcommand. Returns false when the sniffer should run.
pub fn handle_subcommands(matches: &ArgMatches, config: &Config) -> Result<bool, SnifferError> {
    if matches.subcommand_matches("list-ports").is_some() {
        let ports = list_serial_ports()?;
        if ports.is_empty() {
            println!("❌ No serial ports found");
        } else {
            println!("📋 Available serial ports:");
            for (name, kind) in ports {
                println!("   - {} ({})", name, kind);
            }
        }
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("decode") {
        let text = match (matches.get_one::<String>("hex"), matches.get_one::<String>("input")) {
            (Some(hex), _) => hex.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => return Err(SnifferError::InvalidData("decode needs HEX or --input".to_string())),
        };
        let bytes = parse_hex(&text)?;
        info!("🔍 Decoding {} captured bytes", bytes.len());

        let report = decode_capture(config, &bytes)?;
        let formatter: Box<dyn DataFormatter> =
            formatter_for(&config.output.console_format).unwrap_or_else(|| Box::new(ConsoleFormatter));

        if report.measurements.is_empty() {
            println!("❌ No request/response pair found");
        } else {
            println!("{}", formatter.format_measurements(&report.measurements));
        }
        if let Some(record) = &report.record {
            println!("{}", formatter.format_record(record));
        }
        println!("📊 {}", report.stats.summary());
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("interpret") {
        let text = matches
            .get_one::<String>("hex")
            .ok_or_else(|| SnifferError::InvalidData("interpret needs HEX".to_string()))?;
        let bytes = parse_hex(text)?;
        for (index, candidates) in interpret_payload(&bytes)?.iter().enumerate() {
            let chunk = &bytes[index * VALUE_LEN..(index + 1) * VALUE_LEN];
            let line: Vec<String> = candidates
                .iter()
                .map(|(order, value)| format!("{}={:<14}", order, value))
                .collect();
            println!("#{:<3} {}  {}", index, hex::encode(chunk), line.join(" "));
        }
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("show-config") {
        let text = config.to_toml_string()?;
        println!("{}", text);
        if let Some(path) = matches.get_one::<String>("save") {
            config.save_to_file(path)?;
            println!("✅ Configuration saved to {}", path);
        }
        return Ok(true);
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_address_parsing() {
        assert_eq!(parse_address("0x9F"), Ok(0x9F));
        assert_eq!(parse_address("159"), Ok(0x9F));
        assert!(parse_address("256").is_err());
        assert_eq!(parse_slave_ids("1, 0x02,"), Ok(vec![1, 2]));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["dtsu666-sniffer", "decode", "--debug", "9f03"])
            .unwrap();
        assert!(matches.get_flag("debug"));
        let decode = matches.subcommand_matches("decode").unwrap();
        assert_eq!(decode.get_one::<String>("hex").unwrap(), "9f03");
    }

    #[test]
    fn test_parse_hex_separators() {
        assert_eq!(parse_hex("9F 03\n20:00,0x00 02").unwrap(), vec![0x9F, 0x03, 0x20, 0x00, 0x00, 0x02]);
        assert!(parse_hex("  ").is_err());
        assert!(matches!(parse_hex("9F0"), Err(SnifferError::InvalidData(_))));
    }

    #[test]
    fn test_decode_capture_extracts_pair() {
        // 9F 03 2000 0002 + slave 01 answering 237.3 V and 5.2 V
        let bytes = parse_hex("9f 03 20 00 00 02 d3 b5").unwrap();
        let mut frame = bytes.clone();
        let mut response = vec![0x01, 0x03, 0x08, 0x4C, 0xCD, 0x43, 0x6D, 0x66, 0x66, 0x40, 0xA6];
        crate::modbus::crc::append_crc(&mut response);
        frame.extend_from_slice(&response);

        let report = decode_capture(&Config::default(), &frame).unwrap();
        assert_eq!(report.measurements.len(), 2);
        assert_eq!(report.measurements[0].register, 0x2000);
        assert_eq!(report.measurements[1].register, 0x2001);
        // 5.2 V on L2 is implausible
        assert!(!report.measurements[1].valid);
        let record = report.record.unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(report.stats.responses_matched, 1);
    }

    #[test]
    fn test_interpret_payload() {
        let rows = interpret_payload(&[0x4C, 0xCD, 0x43, 0x6D]).unwrap();
        let (order, value) = rows[0][1];
        assert_eq!(order, ByteOrder::Cdab);
        assert!((value - 237.3).abs() < 1e-3);
        assert!(interpret_payload(&[1, 2, 3]).is_err());
    }
}
