use log::{debug, trace};

use crate::modbus::crc::verify_frame;
use crate::modbus::protocol::{RequestFrame, ResponseFrame, RESPONSE_HEADER_LEN, RESPONSE_OVERHEAD};

/// Largest payload a single RTU read response can carry as whole 32-bit values.
pub const DEFAULT_MAX_BYTE_COUNT: usize = 248;

/// How far past the request end an adjacent response may start.
pub const DEFAULT_ADJACENT_WINDOW: usize = 8;

/// Frame acceptance rules shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct ResponseRules {
    pub master_address: u8,
    pub max_byte_count: usize,
}

impl ResponseRules {
    pub fn plausible_byte_count(&self, byte_count: usize) -> bool {
        byte_count > 0 && byte_count % 4 == 0 && byte_count <= self.max_byte_count
    }

    /// Longest frame a strategy could ever accept.
    pub fn max_frame_len(&self) -> usize {
        RESPONSE_OVERHEAD + self.max_byte_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Response starting within `window` bytes of the request end.
    Adjacent { window: usize },
    /// Anywhere in the search window.
    FullBuffer,
    /// Full-buffer search limited to these slave addresses.
    KnownSlaves(Vec<u8>),
}

impl SearchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SearchStrategy::Adjacent { .. } => "adjacent",
            SearchStrategy::FullBuffer => "full-buffer",
            SearchStrategy::KnownSlaves(_) => "known-slave",
        }
    }

    pub fn search(&self, window: &[u8], request: &RequestFrame, rules: &ResponseRules) -> Option<LocatedResponse> {
        match self {
            SearchStrategy::Adjacent { window: reach } => {
                let last = (*reach).min(window.len());
                scan(window, 0..last + 1, request, rules, |_, _| true)
            }
            SearchStrategy::FullBuffer => scan(window, 0..window.len(), request, rules, |_, _| true),
            SearchStrategy::KnownSlaves(ids) if ids.is_empty() => None,
            SearchStrategy::KnownSlaves(ids) => {
                scan(window, 0..window.len(), request, rules, |address, _| ids.contains(&address))
            }
        }
    }
}

/// A CRC-valid response and its offset in the searched window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedResponse {
    pub frame: ResponseFrame,
    pub offset: usize,
    pub strategy: &'static str,
}

impl LocatedResponse {
    /// First byte after the response, relative to the searched window.
    pub fn end(&self) -> usize {
        self.offset + self.frame.wire_len()
    }
}

fn scan<F>(
    window: &[u8],
    positions: std::ops::Range<usize>,
    request: &RequestFrame,
    rules: &ResponseRules,
    accept: F,
) -> Option<LocatedResponse>
where
    F: Fn(u8, usize) -> bool,
{
    for pos in positions {
        let Some(header) = window.get(pos..pos + RESPONSE_HEADER_LEN) else {
            break;
        };
        let (address, function, byte_count) = (header[0], header[1], header[2] as usize);

        if address == rules.master_address
            || function != request.function.code()
            || !rules.plausible_byte_count(byte_count)
            || !accept(address, byte_count)
        {
            continue;
        }

        // A cut-off candidate may still be followed by a complete one
        let Some(frame) = window.get(pos..pos + RESPONSE_OVERHEAD + byte_count) else {
            continue;
        };

        if !verify_frame(frame) {
            trace!("Response candidate at {} from 0x{:02X} failed CRC", pos, address);
            continue;
        }

        if let Ok(frame) = ResponseFrame::parse(frame) {
            return Some(LocatedResponse {
                frame,
                offset: pos,
                strategy: "",
            });
        }
    }
    None
}

/// Tries each strategy in order and stops at the first match.
#[derive(Debug, Clone)]
pub struct ResponseLocator {
    strategies: Vec<SearchStrategy>,
    rules: ResponseRules,
}

impl ResponseLocator {
    pub fn new(rules: ResponseRules, adjacent_window: usize, slave_ids: &[u8]) -> Self {
        let mut strategies = vec![SearchStrategy::Adjacent { window: adjacent_window }, SearchStrategy::FullBuffer];
        if !slave_ids.is_empty() {
            strategies.push(SearchStrategy::KnownSlaves(slave_ids.to_vec()));
        }
        Self { strategies, rules }
    }

    pub fn strategies(&self) -> &[SearchStrategy] {
        &self.strategies
    }

    pub fn rules(&self) -> &ResponseRules {
        &self.rules
    }

    /// Searches `window`, the bytes following `request`, for its response.
    pub fn find_response(&self, window: &[u8], request: &RequestFrame) -> Option<LocatedResponse> {
        self.strategies.iter().find_map(|strategy| {
            let mut found = strategy.search(window, request, &self.rules)?;
            found.strategy = strategy.name();
            debug!(
                "🔗 {} matched at +{} via {} search",
                found.frame, found.offset, found.strategy
            );
            Some(found)
        })
    }
}
