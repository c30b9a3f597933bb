use std::fmt;

use crate::modbus::protocol::FunctionCode;
use crate::utils::error::SnifferError;

pub const VALUE_LEN: usize = 4;

/// One 32-bit value recovered from a response payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    /// Chunk position in the payload.
    pub index: usize,
    pub value: f32,
    /// Source bytes in wire order.
    pub raw: [u8; VALUE_LEN],
    /// Chunk contains what looks like a request header.
    pub false_marker: bool,
}

impl DecodedValue {
    pub fn register_offset(&self, start_register: u16) -> u16 {
        start_register.wrapping_add(self.index as u16)
    }

    pub fn raw_hex(&self) -> String {
        hex::encode(self.raw)
    }
}

/// Word-swapped big-endian: wire [A,B,C,D] is the float [C,D,A,B].
pub fn cdab_to_f32(chunk: [u8; VALUE_LEN]) -> f32 {
    f32::from_be_bytes([chunk[2], chunk[3], chunk[0], chunk[1]])
}

pub fn f32_to_cdab(value: f32) -> [u8; VALUE_LEN] {
    let b = value.to_be_bytes();
    [b[2], b[3], b[0], b[1]]
}

/// Encodes values the way the meter puts them on the wire.
pub fn encode_cdab(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| f32_to_cdab(*v)).collect()
}

pub struct PayloadDecoder {
    master_address: u8,
}

impl PayloadDecoder {
    pub fn new(master_address: u8) -> Self {
        Self { master_address }
    }

    /// Splits `payload` into 4-byte chunks and decodes each as a CDAB float.
    ///
    /// Rejects payloads that are empty or not a multiple of 4 bytes.
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<DecodedValue>, SnifferError> {
        if payload.is_empty() || payload.len() % VALUE_LEN != 0 {
            return Err(SnifferError::MalformedPayload(payload.len()));
        }

        Ok(payload
            .chunks_exact(VALUE_LEN)
            .enumerate()
            .map(|(index, chunk)| {
                let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
                DecodedValue {
                    index,
                    value: cdab_to_f32(raw),
                    raw,
                    false_marker: self.has_false_marker(&raw),
                }
            })
            .collect())
    }

    fn has_false_marker(&self, chunk: &[u8]) -> bool {
        chunk
            .windows(2)
            .any(|pair| pair[0] == self.master_address && FunctionCode::is_read(pair[1]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Abcd,
    Cdab,
    Badc,
    Dcba,
}

impl ByteOrder {
    pub const ALL: [ByteOrder; 4] = [ByteOrder::Abcd, ByteOrder::Cdab, ByteOrder::Badc, ByteOrder::Dcba];

    pub fn reorder(self, c: [u8; VALUE_LEN]) -> [u8; VALUE_LEN] {
        match self {
            ByteOrder::Abcd => c,
            ByteOrder::Cdab => [c[2], c[3], c[0], c[1]],
            ByteOrder::Badc => [c[1], c[0], c[3], c[2]],
            ByteOrder::Dcba => [c[3], c[2], c[1], c[0]],
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ByteOrder::Abcd => "ABCD",
            ByteOrder::Cdab => "CDAB",
            ByteOrder::Badc => "BADC",
            ByteOrder::Dcba => "DCBA",
        };
        f.write_str(name)
    }
}

/// Every byte-order reading of one chunk. Exploration aid for the
/// `interpret` command only; the decode path always uses CDAB.
pub fn interpretations(chunk: [u8; VALUE_LEN]) -> [(ByteOrder, f32); 4] {
    ByteOrder::ALL.map(|order| (order, f32::from_be_bytes(order.reorder(chunk))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::protocol::DEFAULT_MASTER_ADDRESS;

    #[test]
    fn test_cdab_decode_known_bytes() {
        // 237.3 = 0x436D4CCD, words swapped on the wire
        assert_eq!(cdab_to_f32([0x4C, 0xCD, 0x43, 0x6D]), 237.3);
        assert_eq!(f32_to_cdab(237.3), [0x4C, 0xCD, 0x43, 0x6D]);
    }

    #[test]
    fn test_cdab_roundtrip_preserves_finite_values() {
        let samples = [
            0.0f32, -0.0, 1.0, -1.0, 237.3, 49.98, -4321.25, f32::MIN_POSITIVE, f32::MAX, f32::MIN, 1.0e-40,
        ];
        for value in samples {
            assert_eq!(cdab_to_f32(f32_to_cdab(value)).to_bits(), value.to_bits());
        }
        let mut bits: u32 = 0x0bad_f00d;
        for _ in 0..1000 {
            bits = bits.wrapping_mul(2_654_435_761).wrapping_add(1);
            let value = f32::from_bits(bits);
            if value.is_finite() {
                assert_eq!(cdab_to_f32(f32_to_cdab(value)).to_bits(), bits);
            }
        }
    }

    #[test]
    fn test_decode_preserves_order_and_index() {
        let decoder = PayloadDecoder::new(DEFAULT_MASTER_ADDRESS);
        let values = decoder.decode(&encode_cdab(&[230.1, 5.5, 50.0])).unwrap();

        assert_eq!(values.len(), 3);
        assert_eq!(values.iter().map(|v| v.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(values[0].value, 230.1);
        assert_eq!(values[2].value, 50.0);
        assert_eq!(values[1].register_offset(0x2000), 0x2001);
        assert!(values.iter().all(|v| !v.false_marker));
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        let decoder = PayloadDecoder::new(DEFAULT_MASTER_ADDRESS);
        assert!(matches!(decoder.decode(&[]), Err(SnifferError::MalformedPayload(0))));
        assert!(matches!(decoder.decode(&[1, 2, 3, 4, 5, 6]), Err(SnifferError::MalformedPayload(6))));
    }

    #[test]
    fn test_false_marker_flags_only_affected_chunk() {
        let decoder = PayloadDecoder::new(DEFAULT_MASTER_ADDRESS);
        let mut payload = encode_cdab(&[230.0]);
        payload.extend([0x00, 0x9F, 0x03, 0x20]);
        payload.extend(encode_cdab(&[231.0]));

        let values = decoder.decode(&payload).unwrap();
        assert_eq!(
            values.iter().map(|v| v.false_marker).collect::<Vec<_>>(),
            vec![false, true, false]
        );
        assert_eq!(values[1].raw_hex(), "009f0320");
    }

    #[test]
    fn test_interpretations_cover_all_orders() {
        let readings = interpretations([0x4C, 0xCD, 0x43, 0x6D]);
        let cdab = readings.iter().find(|(order, _)| *order == ByteOrder::Cdab).unwrap();
        assert_eq!(cdab.1, 237.3);
        assert_eq!(readings[0].0.to_string(), "ABCD");
    }
}
