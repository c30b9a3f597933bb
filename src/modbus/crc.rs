//! Modbus RTU CRC16 (reflected polynomial 0xA001, initial value 0xFFFF).

const CRC_POLY: u16 = 0xA001;
const CRC_INIT: u16 = 0xFFFF;

/// Length of the trailing CRC field of every RTU frame.
pub const CRC_LEN: usize = 2;

pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = CRC_INIT;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Checks the trailing little-endian CRC of a complete frame.
///
/// Frames too short to carry a CRC field are never valid.
pub fn verify_frame(frame: &[u8]) -> bool {
    if frame.len() < CRC_LEN {
        return false;
    }
    let data_len = frame.len() - CRC_LEN;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    crc16_modbus(&frame[..data_len]) == received
}

/// Appends the CRC of `frame` to it, little-endian as on the wire.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_modbus_known_vector() {
        // Read holding registers, slave 1, start 0, count 10 -> C5 CD on the wire
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(crc16_modbus(&data), 0xCDC5);
    }

    #[test]
    fn test_crc16_empty_is_init() {
        assert_eq!(crc16_modbus(&[]), 0xFFFF);
    }

    #[test]
    fn test_verify_matches_compute_for_many_frames() {
        let mut seed: u32 = 0x1234_5678;
        for len in 2..64usize {
            let mut frame: Vec<u8> = (0..len)
                .map(|_| {
                    seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    (seed >> 16) as u8
                })
                .collect();

            let body = len - CRC_LEN;
            let expected = crc16_modbus(&frame[..body]) == u16::from_le_bytes([frame[body], frame[body + 1]]);
            assert_eq!(verify_frame(&frame), expected);

            frame.truncate(body);
            append_crc(&mut frame);
            assert!(verify_frame(&frame), "frame of len {} should verify after append_crc", len);
        }
    }

    #[test]
    fn test_verify_rejects_short_input() {
        assert!(!verify_frame(&[]));
        assert!(!verify_frame(&[0x9F]));
    }

    #[test]
    fn test_verify_rejects_single_bit_flip() {
        let mut frame = vec![0x9F, 0x03, 0x20, 0x00, 0x00, 0x02];
        append_crc(&mut frame);
        frame[3] ^= 0x01;
        assert!(!verify_frame(&frame));
    }
}
