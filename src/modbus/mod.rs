pub mod crc;
pub mod protocol;
pub mod serial;

pub use crc::{crc16_modbus, verify_frame};
pub use protocol::{FunctionCode, RequestFrame, ResponseFrame, DEFAULT_MASTER_ADDRESS, REQUEST_LEN};
pub use serial::{ByteSource, ReplaySource, SerialByteSource};
