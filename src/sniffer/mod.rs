pub mod buffer;
pub mod engine;
pub mod request;
pub mod response;

pub use buffer::{StreamBuffer, MAX_BUFFER_SIZE};
pub use engine::{SnifferEngine, SnifferSettings, SnifferStats};
pub use request::{DetectedRequest, RequestDetector};
pub use response::{LocatedResponse, ResponseLocator, ResponseRules, SearchStrategy};
