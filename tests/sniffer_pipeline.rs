use std::sync::Arc;

use dtsu666_sniffer::config::{Config, FileOutputConfig};
use dtsu666_sniffer::devices::decoder::encode_cdab;
use dtsu666_sniffer::devices::{Dtsu666, Meter};
use dtsu666_sniffer::modbus::crc::append_crc;
use dtsu666_sniffer::modbus::ReplaySource;
use dtsu666_sniffer::output::{MeasurementBatch, PublishRecord};
use dtsu666_sniffer::{SnifferEngine, SnifferError, SnifferService, SnifferSettings};

fn request(start: u16, count: u16) -> Vec<u8> {
    let mut frame = vec![0x9F, 0x03];
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);
    frame
}

fn response(slave: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![slave, 0x03, payload.len() as u8];
    frame.extend_from_slice(payload);
    append_crc(&mut frame);
    frame
}

fn engine(settings: SnifferSettings) -> SnifferEngine {
    SnifferEngine::new(settings, Arc::new(Dtsu666.register_map().unwrap()))
}

#[test]
fn voltage_pair_in_a_single_read() {
    let mut bytes = vec![0x9F, 0x03, 0x20, 0x00, 0x00, 0x02, 0xD3, 0xB5];
    bytes.extend(response(0x01, &[0x4C, 0xCD, 0x43, 0x6D, 0x00, 0x00, 0x43, 0x67]));

    let mut engine = engine(SnifferSettings::default());
    let measurements = engine.feed(&bytes);

    assert_eq!(measurements.len(), 2);
    assert_eq!(measurements[0].register, 0x2000);
    assert_eq!(measurements[0].label, "Voltage L1");
    assert!((measurements[0].value - 237.3).abs() < 1e-3);
    assert_eq!(measurements[1].register, 0x2001);
    assert_eq!(measurements[1].value, 231.0);
    assert!(measurements.iter().all(|m| m.valid));
    assert!(engine.buffer().is_empty());
}

#[test]
fn byte_count_not_multiple_of_four_is_unmatched() {
    let mut bytes = request(0x2000, 2);
    bytes.extend(response(0x01, &[0x10, 0x20, 0x30, 0x40, 0x50, 0x60]));
    bytes.extend(request(0x2000, 2));

    let mut engine = engine(SnifferSettings::default());
    let measurements = engine.feed(&bytes);

    assert!(measurements.is_empty());
    assert_eq!(engine.stats().responses_matched, 0);
    assert_eq!(engine.stats().unmatched_requests, 1);
}

#[test]
fn distant_response_found_by_full_buffer_search() {
    // Twelve bytes answering a count=2 request, 20 bytes past it
    let mut bytes = request(0x2000, 2);
    bytes.extend([0x00; 20]);
    bytes.extend(response(0x01, &encode_cdab(&[230.0, 231.0, 229.5])));
    bytes.extend(request(0x2000, 2));

    let mut engine = engine(SnifferSettings::default());
    let measurements = engine.feed(&bytes);

    assert_eq!(measurements.len(), 3);
    assert_eq!(measurements[2].register, 0x2002);
    assert_eq!(measurements[2].value, 229.5);
    assert_eq!(engine.stats().responses_matched, 1);
    assert_eq!(engine.stats().unmatched_requests, 0);
}

#[test]
fn implausible_voltage_dropped_current_kept() {
    // 0x2002 Voltage L3 = 5000 V, 0x2003 Current L1 = 5.2 A
    let mut bytes = request(0x2002, 2);
    bytes.extend(response(0x01, &encode_cdab(&[5000.0, 5.2])));

    let mut engine = engine(SnifferSettings::default());
    let measurements = engine.feed(&bytes);
    assert_eq!(measurements.len(), 2);
    assert!(!measurements[0].valid);
    assert!(measurements[1].valid);
    assert_eq!(engine.stats().out_of_range, 1);

    let mut batch = MeasurementBatch::new();
    assert_eq!(batch.extend(&measurements), 1);
    let record = batch.take(chrono::Utc::now()).unwrap();
    assert!(!record.values.contains_key("Voltage L3"));
    let current = &record.values["Current L1"];
    assert!((current.value - 5.2).abs() < 1e-6);
    assert_eq!(current.unit, "A");
    assert_eq!(current.raw, "666640a6");
}

#[test]
fn resyncs_past_corrupt_request_byte_by_byte() {
    // A request-like prefix with a bad CRC, then the real exchange.
    let mut bytes = vec![0x9F, 0x03, 0x20, 0x00, 0x00, 0x02, 0x00, 0x00];
    bytes.extend(request(0x2000, 1));
    bytes.extend(response(0x01, &encode_cdab(&[230.0])));

    let mut engine = engine(SnifferSettings::default());
    let mut measurements = Vec::new();
    for byte in bytes {
        measurements.extend(engine.feed(&[byte]));
    }

    assert_eq!(measurements.len(), 1);
    assert_eq!(measurements[0].label, "Voltage L1");
    assert_eq!(measurements[0].value, 230.0);
    assert_eq!(engine.stats().requests_seen, 1);
}

#[test]
fn small_buffer_evicts_oldest_bytes_and_keeps_working() {
    let settings = SnifferSettings {
        buffer_size: 64,
        ..SnifferSettings::default()
    };
    let mut engine = engine(settings);

    for _ in 0..10 {
        assert!(engine.feed(&[0u8; 50]).is_empty());
        assert!(engine.buffer().len() <= 64);
    }
    assert!(engine.stats().bytes_evicted > 0);

    let mut bytes = request(0x200A, 2);
    bytes.extend(response(0x01, &encode_cdab(&[50.0, 1234.5])));
    let measurements = engine.feed(&bytes);

    assert_eq!(measurements.len(), 2);
    assert_eq!(measurements[0].label, "Frequency");
    assert_eq!(measurements[1].label, "Energy Import");
    assert!(engine.buffer().len() <= engine.buffer().capacity());
}

#[tokio::test]
async fn service_writes_json_lines_until_source_ends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("values.jsonl");

    let mut config = Config::default();
    config.publish_interval_seconds = 3600;
    config.output.console = false;
    config.output.file_output = Some(FileOutputConfig {
        path: path.to_string_lossy().to_string(),
        append: true,
    });

    let mut capture = request(0x2000, 3);
    capture.extend(response(0x01, &encode_cdab(&[230.0, 231.0, 229.5])));
    let chunks: Vec<Vec<u8>> = capture.chunks(5).map(|c| c.to_vec()).collect();

    let mut service = SnifferService::from_config(config).unwrap();
    let result = service.run(Box::new(ReplaySource::new("capture", chunks))).await;
    assert!(matches!(result, Err(SnifferError::ConnectionError(_))));

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);

    let record: PublishRecord = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record.len(), 3);
    assert_eq!(record.values["Voltage L2"].value, 231.0);
    assert_eq!(record.values["Voltage L3"].raw, "80004365");
    assert!(record.timestamp.ends_with('Z'));
}
