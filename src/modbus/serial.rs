use log::{error, info};
use serialport::SerialPort;
use std::io::{ErrorKind, Read};
use std::time::Duration;

use crate::config::settings::ParityConfig;
use crate::utils::error::SnifferError;

const READ_CHUNK: usize = 256;

/// Something that yields raw bus bytes, one chunk per call.
///
/// An empty chunk means nothing arrived before the read timeout.
pub trait ByteSource: Send {
    fn read(&mut self) -> Result<Vec<u8>, SnifferError>;
    fn describe(&self) -> String;
}

pub struct SerialByteSource {
    port: Box<dyn SerialPort>,
    port_name: String,
    scratch: [u8; READ_CHUNK],
}

impl SerialByteSource {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        parity: &ParityConfig,
        timeout_ms: u64,
    ) -> Result<Self, SnifferError> {
        info!("🔌 Opening RS-485 port for sniffing: {}", port_name);
        info!("⚙️  Configuration: {} baud, 8 data bits, 1 stop bit, parity {:?}", baud_rate, parity);

        let serial_parity = match parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };

        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(timeout_ms))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serial_parity)
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", port_name, e);
                SnifferError::ConnectionError(format!("Failed to open port {}: {}", port_name, e))
            })?;

        info!("✅ Listening on {} (passive, never transmitting)", port_name);
        Ok(Self {
            port,
            port_name: port_name.to_string(),
            scratch: [0u8; READ_CHUNK],
        })
    }
}

impl ByteSource for SerialByteSource {
    fn read(&mut self) -> Result<Vec<u8>, SnifferError> {
        match self.port.read(&mut self.scratch) {
            Ok(n) => Ok(self.scratch[..n].to_vec()),
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => Ok(Vec::new()),
            Err(e) => Err(SnifferError::ConnectionError(format!(
                "Read from {} failed: {}",
                self.port_name, e
            ))),
        }
    }

    fn describe(&self) -> String {
        self.port_name.clone()
    }
}

/// Serial ports the OS reports, with a short description of each.
pub fn list_serial_ports() -> Result<Vec<(String, String)>, SnifferError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let kind = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "Unknown".to_string(),
            };
            (p.port_name, kind)
        })
        .collect())
}

/// Replays a fixed sequence of chunks as if they came off the bus.
pub struct ReplaySource {
    chunks: std::collections::VecDeque<Vec<u8>>,
    label: String,
}

impl ReplaySource {
    pub fn new(label: &str, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            label: label.to_string(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl ByteSource for ReplaySource {
    fn read(&mut self) -> Result<Vec<u8>, SnifferError> {
        self.chunks
            .pop_front()
            .ok_or_else(|| SnifferError::ConnectionError(format!("{} exhausted", self.label)))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
