use std::fmt;

use super::crc::{append_crc, verify_frame, CRC_LEN};
use crate::utils::error::SnifferError;

/// Wire length of a read request: address, function, start(2), count(2), crc(2).
pub const REQUEST_LEN: usize = 8;

/// Address, function and byte-count header of a read response.
pub const RESPONSE_HEADER_LEN: usize = 3;

/// Fixed bytes of a read response besides its payload.
pub const RESPONSE_OVERHEAD: usize = RESPONSE_HEADER_LEN + CRC_LEN;

/// Master address used by the inverter polling the DTSU666 on this bus.
pub const DEFAULT_MASTER_ADDRESS: u8 = 0x9F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadHolding = 0x03,
    ReadInput = 0x04,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        function_name(self.code())
    }

    pub fn is_read(code: u8) -> bool {
        Self::try_from(code).is_ok()
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = SnifferError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x03 => Ok(FunctionCode::ReadHolding),
            0x04 => Ok(FunctionCode::ReadInput),
            other => Err(SnifferError::UnsupportedFunction(other)),
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

/// Human-readable name of any Modbus function code, used in frame dumps.
pub fn function_name(code: u8) -> &'static str {
    match code {
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        0x03 => "Read Holding Registers",
        0x04 => "Read Input Registers",
        0x05 => "Write Single Coil",
        0x06 => "Write Single Register",
        0x0F => "Write Multiple Coils",
        0x10 => "Write Multiple Registers",
        c if c & 0x80 != 0 => "Exception Response",
        _ => "Unknown",
    }
}

/// A master read request observed on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub master_address: u8,
    pub function: FunctionCode,
    pub start_register: u16,
    pub register_count: u16,
    pub crc: u16,
}

impl RequestFrame {
    /// Builds a request with a correct CRC.
    pub fn new(master_address: u8, function: FunctionCode, start_register: u16, register_count: u16) -> Self {
        let mut body = Vec::with_capacity(REQUEST_LEN);
        body.push(master_address);
        body.push(function.code());
        body.extend_from_slice(&start_register.to_be_bytes());
        body.extend_from_slice(&register_count.to_be_bytes());
        let crc = super::crc::crc16_modbus(&body);

        Self {
            master_address,
            function,
            start_register,
            register_count,
            crc,
        }
    }

    /// Parses and CRC-checks the first `REQUEST_LEN` bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, SnifferError> {
        let frame = bytes.get(..REQUEST_LEN).ok_or(SnifferError::IncompleteFrame {
            needed: REQUEST_LEN,
            available: bytes.len(),
        })?;

        let function = FunctionCode::try_from(frame[1])?;
        if !verify_frame(frame) {
            return Err(SnifferError::CrcError);
        }

        Ok(Self {
            master_address: frame[0],
            function,
            start_register: u16::from_be_bytes([frame[2], frame[3]]),
            register_count: u16::from_be_bytes([frame[4], frame[5]]),
            crc: u16::from_le_bytes([frame[6], frame[7]]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(REQUEST_LEN);
        bytes.push(self.master_address);
        bytes.push(self.function.code());
        bytes.extend_from_slice(&self.start_register.to_be_bytes());
        bytes.extend_from_slice(&self.register_count.to_be_bytes());
        bytes.extend_from_slice(&self.crc.to_le_bytes());
        bytes
    }
}

impl fmt::Display for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request[0x{:02X}] {} start=0x{:04X} count={}",
            self.master_address, self.function, self.start_register, self.register_count
        )
    }
}

/// A slave read response observed on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub slave_address: u8,
    pub function: FunctionCode,
    pub byte_count: u8,
    pub payload: Vec<u8>,
    pub crc: u16,
}

impl ResponseFrame {
    /// Builds a response with a correct CRC.
    pub fn new(slave_address: u8, function: FunctionCode, payload: Vec<u8>) -> Result<Self, SnifferError> {
        let byte_count = u8::try_from(payload.len())
            .map_err(|_| SnifferError::InvalidData(format!("payload too long: {} bytes", payload.len())))?;

        let mut body = Vec::with_capacity(RESPONSE_OVERHEAD + payload.len());
        body.push(slave_address);
        body.push(function.code());
        body.push(byte_count);
        body.extend_from_slice(&payload);
        let crc = super::crc::crc16_modbus(&body);

        Ok(Self {
            slave_address,
            function,
            byte_count,
            payload,
            crc,
        })
    }

    /// Parses and CRC-checks a response frame starting at `bytes[0]`.
    pub fn parse(bytes: &[u8]) -> Result<Self, SnifferError> {
        let header = bytes.get(..RESPONSE_HEADER_LEN).ok_or(SnifferError::IncompleteFrame {
            needed: RESPONSE_HEADER_LEN,
            available: bytes.len(),
        })?;

        let function = FunctionCode::try_from(header[1])?;
        let byte_count = header[2];
        let frame_len = RESPONSE_OVERHEAD + byte_count as usize;
        let frame = bytes.get(..frame_len).ok_or(SnifferError::IncompleteFrame {
            needed: frame_len,
            available: bytes.len(),
        })?;

        if !verify_frame(frame) {
            return Err(SnifferError::CrcError);
        }

        let payload_end = RESPONSE_HEADER_LEN + byte_count as usize;
        Ok(Self {
            slave_address: frame[0],
            function,
            byte_count,
            payload: frame[RESPONSE_HEADER_LEN..payload_end].to_vec(),
            crc: u16::from_le_bytes([frame[payload_end], frame[payload_end + 1]]),
        })
    }

    /// Payload as big-endian 16-bit registers; a trailing odd byte is ignored.
    pub fn register_words(&self) -> Vec<u16> {
        self.payload
            .chunks_exact(2)
            .map(|word| u16::from_be_bytes([word[0], word[1]]))
            .collect()
    }

    /// Total bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        RESPONSE_OVERHEAD + self.payload.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.wire_len());
        bytes.push(self.slave_address);
        bytes.push(self.function.code());
        bytes.push(self.byte_count);
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.crc.to_le_bytes());
        bytes
    }
}

impl fmt::Display for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response[0x{:02X}] {} {} bytes",
            self.slave_address, self.function, self.byte_count
        )
    }
}

/// Encodes a raw frame body and appends its CRC. Handy for building test traffic.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    append_crc(&mut frame);
    frame
}
