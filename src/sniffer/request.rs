use log::trace;

use crate::modbus::protocol::{FunctionCode, RequestFrame, REQUEST_LEN};
use crate::modbus::crc::verify_frame;

/// A CRC-valid request and where it starts in the scanned bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedRequest {
    pub frame: RequestFrame,
    pub offset: usize,
}

impl DetectedRequest {
    /// First byte after the request.
    pub fn end(&self) -> usize {
        self.offset + REQUEST_LEN
    }
}

/// Finds master read requests by their sentinel address.
#[derive(Debug, Clone, Copy)]
pub struct RequestDetector {
    master_address: u8,
}

impl RequestDetector {
    pub fn new(master_address: u8) -> Self {
        Self { master_address }
    }

    pub fn master_address(&self) -> u8 {
        self.master_address
    }

    /// Returns the earliest CRC-valid request in `bytes`.
    ///
    /// A candidate that fails CRC only advances the scan by one byte, since the
    /// real frame may start inside it. A candidate cut off by the end of the
    /// buffer stops the scan; it is retried once more bytes arrive.
    pub fn find_next_request(&self, bytes: &[u8]) -> Option<DetectedRequest> {
        let mut offset = 0;
        while offset + 1 < bytes.len() {
            if !self.is_candidate(bytes[offset], bytes[offset + 1]) {
                offset += 1;
                continue;
            }

            let Some(window) = bytes.get(offset..offset + REQUEST_LEN) else {
                trace!("Request candidate at {} incomplete ({} bytes buffered)", offset, bytes.len() - offset);
                return None;
            };

            if verify_frame(window) {
                if let Ok(frame) = RequestFrame::parse(window) {
                    return Some(DetectedRequest { frame, offset });
                }
            }

            trace!("Request candidate at {} failed CRC, resyncing", offset);
            offset += 1;
        }
        None
    }

    fn is_candidate(&self, address: u8, function: u8) -> bool {
        address == self.master_address && FunctionCode::is_read(function)
    }
}
