//! Incremental parser for `<event type="...">...</event>` units embedded in
//! an agent's streamed answer.
//!
//! Chunks may split a tag anywhere. Each `feed` call scans the retained
//! buffer once, collects every complete event, dispatches them in buffer
//! order, then cuts the consumed text off the front of the buffer by offset.
//! The buffer always starts at the earliest point where an event can still
//! begin, so a half-received tag survives until its closing marker arrives.

mod dispatcher;
mod display;
mod extractor;
mod payloads;

use tracing::debug;

use self::dispatcher::DispatchOutcome;
use self::extractor::{extract_complete_events, retention_start};

pub use self::dispatcher::EventHandlers;
pub use self::display::Transcript;
pub use self::payloads::{AlertNotice, CameraFeed, GeocodeEvent, RoutePlan, WeatherReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub matched: usize,
    pub delivered: usize,
    pub rejected: usize,
    pub ignored: usize,
}

impl FeedReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        self.matched += 1;
        match outcome {
            DispatchOutcome::Delivered(_) => self.delivered += 1,
            DispatchOutcome::Rejected(_) => self.rejected += 1,
            DispatchOutcome::Unregistered(_) | DispatchOutcome::Unknown => self.ignored += 1,
        }
    }

    fn absorb(&mut self, other: FeedReport) {
        self.matched += other.matched;
        self.delivered += other.delivered;
        self.rejected += other.rejected;
        self.ignored += other.ignored;
    }
}

pub struct EventParser {
    buffer: String,
    handlers: EventHandlers,
    totals: FeedReport,
}

impl EventParser {
    pub fn new(handlers: EventHandlers) -> Self {
        Self {
            buffer: String::new(),
            handlers,
            totals: FeedReport::default(),
        }
    }

    pub fn feed(&mut self, chunk: &str) -> FeedReport {
        let mut report = FeedReport::default();
        if chunk.is_empty() {
            return report;
        }
        self.buffer.push_str(chunk);

        let extracted = extract_complete_events(&self.buffer);
        let consumed_to = extracted.last().map(|item| item.raw_end).unwrap_or(0);

        for item in &extracted {
            report.record(dispatcher::dispatch(&self.handlers, &item.event));
        }

        let keep_from = retention_start(&self.buffer, consumed_to);
        if keep_from > 0 {
            self.buffer.drain(..keep_from);
        }

        self.totals.absorb(report);
        report
    }

    /// Text received but not yet part of a complete event.
    #[cfg(test)]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn totals(&self) -> FeedReport {
        self.totals
    }

    /// Ends the stream. Whatever is left is an unfinished tag and is dropped.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let leftover = std::mem::take(&mut self.buffer);
        debug!(
            "[STREAM] discarding {} bytes of unfinished event text",
            leftover.len()
        );
        Some(leftover)
    }
}
