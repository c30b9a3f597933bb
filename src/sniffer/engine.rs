use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;

use super::buffer::StreamBuffer;
use super::request::RequestDetector;
use super::response::{ResponseLocator, ResponseRules};
use crate::devices::decoder::PayloadDecoder;
use crate::devices::mapper::{self, MappedMeasurement};
use crate::devices::plausibility::PlausibilityFilter;
use crate::devices::register_map::RegisterMap;
use crate::modbus::protocol::{RequestFrame, ResponseFrame};

/// Recent requests kept for correlating responses across buffer churn.
pub const REQUEST_HISTORY_LEN: usize = 4;

/// Tunables of the sniffing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnifferSettings {
    pub master_address: u8,
    pub buffer_size: usize,
    pub adjacent_window: usize,
    pub max_byte_count: usize,
    pub slave_ids: Vec<u8>,
    pub dump_frames: bool,
}

impl Default for SnifferSettings {
    fn default() -> Self {
        Self {
            master_address: crate::modbus::protocol::DEFAULT_MASTER_ADDRESS,
            buffer_size: super::buffer::MAX_BUFFER_SIZE,
            adjacent_window: super::response::DEFAULT_ADJACENT_WINDOW,
            max_byte_count: super::response::DEFAULT_MAX_BYTE_COUNT,
            slave_ids: Vec::new(),
            dump_frames: false,
        }
    }
}

/// Diagnostic counters. Nothing here ever stops the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnifferStats {
    pub bytes_received: u64,
    pub bytes_evicted: u64,
    pub requests_seen: u64,
    pub responses_matched: u64,
    pub history_matches: u64,
    pub unmatched_requests: u64,
    pub malformed_payloads: u64,
    pub false_markers: u64,
    pub out_of_range: u64,
    pub measurements_accepted: u64,
}

impl SnifferStats {
    pub fn summary(&self) -> String {
        format!(
            "rx={}B evicted={}B requests={} matched={} (history {}) unmatched={} malformed={} false_markers={} out_of_range={} accepted={}",
            self.bytes_received,
            self.bytes_evicted,
            self.requests_seen,
            self.responses_matched,
            self.history_matches,
            self.unmatched_requests,
            self.malformed_payloads,
            self.false_markers,
            self.out_of_range,
            self.measurements_accepted
        )
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    frame: RequestFrame,
    answered: bool,
}

/// Bounded record of the last few requests seen on the bus.
#[derive(Debug, Default)]
pub struct RequestHistory {
    entries: VecDeque<HistoryEntry>,
    awaiting: Option<RequestFrame>,
}

impl RequestHistory {
    fn record(&mut self, frame: &RequestFrame, answered: bool) {
        if self.entries.len() == REQUEST_HISTORY_LEN {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            frame: frame.clone(),
            answered,
        });
    }

    /// Request whose response has not arrived yet.
    pub fn awaiting(&self) -> Option<&RequestFrame> {
        self.awaiting.as_ref()
    }

    /// Most recent requests, oldest first, with whether each was answered.
    pub fn recent(&self) -> impl Iterator<Item = (&RequestFrame, bool)> {
        self.entries.iter().map(|e| (&e.frame, e.answered))
    }
}

enum Step {
    Matched {
        request: RequestFrame,
        response: ResponseFrame,
        consume: usize,
        from_history: bool,
    },
    Unmatched {
        request: RequestFrame,
        consume: usize,
    },
    Wait {
        consume: usize,
        awaiting: RequestFrame,
    },
    Idle,
}

/// Sequential sniffing pipeline: buffer, detect, locate, decode, map, filter.
pub struct SnifferEngine {
    settings: SnifferSettings,
    buffer: StreamBuffer,
    detector: RequestDetector,
    locator: ResponseLocator,
    decoder: PayloadDecoder,
    registers: Arc<RegisterMap>,
    filter: PlausibilityFilter,
    history: RequestHistory,
    stats: SnifferStats,
}

impl SnifferEngine {
    pub fn new(settings: SnifferSettings, registers: Arc<RegisterMap>) -> Self {
        let rules = ResponseRules {
            master_address: settings.master_address,
            max_byte_count: settings.max_byte_count,
        };
        info!(
            "🧭 Sniffer ready: master 0x{:02X}, {} byte buffer, {} registers ({})",
            settings.master_address,
            settings.buffer_size,
            registers.len(),
            registers.model()
        );

        Self {
            buffer: StreamBuffer::new(settings.buffer_size),
            detector: RequestDetector::new(settings.master_address),
            locator: ResponseLocator::new(rules, settings.adjacent_window, &settings.slave_ids),
            decoder: PayloadDecoder::new(settings.master_address),
            filter: PlausibilityFilter::new(registers.clone()),
            registers,
            history: RequestHistory::default(),
            stats: SnifferStats::default(),
            settings,
        }
    }

    /// Appends freshly read bytes and extracts every pair now complete.
    ///
    /// Returns all mapped measurements, including those the plausibility
    /// filter marked invalid.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<MappedMeasurement> {
        if bytes.is_empty() {
            return Vec::new();
        }
        self.stats.bytes_received += bytes.len() as u64;
        let evicted = self.buffer.append(bytes);
        self.stats.bytes_evicted += evicted as u64;
        self.process()
    }

    /// Extracts request/response pairs until nothing more can be done with
    /// the bytes currently buffered.
    pub fn process(&mut self) -> Vec<MappedMeasurement> {
        let mut measurements = Vec::new();
        loop {
            match self.next_step() {
                Step::Matched {
                    request,
                    response,
                    consume,
                    from_history,
                } => {
                    self.note_request(&request);
                    self.history.awaiting = None;
                    self.history.record(&request, true);
                    self.stats.responses_matched += 1;
                    if from_history {
                        self.stats.history_matches += 1;
                    }
                    self.buffer.consume(consume);
                    measurements.extend(self.decode_pair(&request, &response));
                }
                Step::Unmatched { request, consume } => {
                    self.note_request(&request);
                    self.history.awaiting = None;
                    self.history.record(&request, false);
                    self.stats.unmatched_requests += 1;
                    debug!("❔ No response found for {}, discarding", request);
                    self.buffer.consume(consume);
                }
                Step::Wait { consume, awaiting } => {
                    self.buffer.consume(consume);
                    if self.note_request(&awaiting) {
                        trace!("⏳ Waiting for response to {}", awaiting);
                    }
                    self.history.awaiting = Some(awaiting);
                    break;
                }
                Step::Idle => break,
            }
        }
        measurements
    }

    /// Counts a request the first time it is handled; a request that waited
    /// for its response was already counted.
    fn note_request(&mut self, request: &RequestFrame) -> bool {
        let first_sighting = self.history.awaiting.as_ref() != Some(request);
        if first_sighting {
            self.stats.requests_seen += 1;
        }
        first_sighting
    }

    /// Bytes after a request beyond which its response can no longer arrive.
    fn give_up_len(&self) -> usize {
        self.settings.adjacent_window + self.locator.rules().max_frame_len()
    }

    fn next_step(&self) -> Step {
        let data = self.buffer.as_slice();
        let found = self.detector.find_next_request(data);
        let prefix_end = found.as_ref().map_or(data.len(), |f| f.offset);

        // Bytes ahead of any request may answer one whose own bytes are gone
        if prefix_end > 0 {
            if let Some(pending) = self.history.awaiting() {
                let prefix = &data[..prefix_end];
                if let Some(located) = self.locator.find_response(prefix, pending) {
                    return Step::Matched {
                        request: pending.clone(),
                        consume: located.end(),
                        response: located.frame,
                        from_history: true,
                    };
                }
                if found.is_none() && prefix_end < self.give_up_len() {
                    return Step::Wait {
                        consume: 0,
                        awaiting: pending.clone(),
                    };
                }
                return Step::Unmatched {
                    request: pending.clone(),
                    consume: 0,
                };
            }
        }

        let Some(found) = found else {
            return Step::Idle;
        };

        let rest = &data[found.end()..];
        let next_request = self.detector.find_next_request(rest).map(|next| next.offset);
        let window = &rest[..next_request.unwrap_or(rest.len())];

        if let Some(located) = self.locator.find_response(window, &found.frame) {
            return Step::Matched {
                consume: found.end() + located.end(),
                request: found.frame,
                response: located.frame,
                from_history: false,
            };
        }

        if next_request.is_some() || window.len() >= self.give_up_len() {
            Step::Unmatched {
                consume: found.end(),
                request: found.frame,
            }
        } else {
            Step::Wait {
                consume: found.offset,
                awaiting: found.frame,
            }
        }
    }

    fn decode_pair(&mut self, request: &RequestFrame, response: &ResponseFrame) -> Vec<MappedMeasurement> {
        if self.settings.dump_frames {
            debug!(
                "📨 {} | raw {}",
                request,
                hex::encode(request.to_bytes())
            );
            debug!(
                "📨 {} | raw {}",
                response,
                hex::encode(response.to_bytes())
            );
            for (i, word) in response.register_words().iter().enumerate() {
                debug!(
                    "   Register 0x{:04X}: {} (0x{:04X})",
                    request.start_register.wrapping_add(i as u16),
                    word,
                    word
                );
            }
        }

        let decoded = match self.decoder.decode(&response.payload) {
            Ok(values) => values,
            Err(e) => {
                self.stats.malformed_payloads += 1;
                warn!("⚠️  Rejected response to {}: {}", request, e);
                return Vec::new();
            }
        };

        let (flagged, clean): (Vec<_>, Vec<_>) = decoded.into_iter().partition(|v| v.false_marker);
        if !flagged.is_empty() {
            self.stats.false_markers += flagged.len() as u64;
            for value in &flagged {
                debug!(
                    "🪤 Excluded chunk {} (0x{:04X}) with embedded request marker: {}",
                    value.index,
                    value.register_offset(request.start_register),
                    value.raw_hex()
                );
            }
        }

        let mut measurements = mapper::map(&clean, request, &self.registers);
        let rejected = self.filter.apply(&mut measurements);
        self.stats.out_of_range += rejected as u64;
        self.stats.measurements_accepted += (measurements.len() - rejected) as u64;

        for measurement in measurements.iter().filter(|m| m.valid) {
            trace!("📈 {}", measurement);
        }
        measurements
    }

    pub fn stats(&self) -> &SnifferStats {
        &self.stats
    }

    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    pub fn history(&self) -> &RequestHistory {
        &self.history
    }

    pub fn settings(&self) -> &SnifferSettings {
        &self.settings
    }

    pub fn registers(&self) -> &Arc<RegisterMap> {
        &self.registers
    }
}
