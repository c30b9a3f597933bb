pub mod sniffer_service;

pub use sniffer_service::SnifferService;
