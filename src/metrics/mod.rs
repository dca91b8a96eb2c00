//! Observability hooks
//!
//! The engine reports datagram traffic and the fate of every received line
//! through an injected [`Observer`] instead of process-wide counters.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::trace;

use crate::core::AddressLabel;

/// What the engine did with a received line or datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineCategory {
    /// ACK with no waiting expectation
    Ack,
    /// NAK with no waiting expectation
    Nak,
    /// NAK delivered to the oldest expectation
    CallbackNak,
    /// Reply delivered to a pattern expectation
    CallbackRegex,
    /// Reply delivered to a line-count expectation
    CallbackExpectedLines,
    /// Push-data line turned into a state update
    PushedData,
    /// Line that could not be parsed
    Error,
}

impl LineCategory {
    /// Tag value used when exporting the category
    pub fn as_str(&self) -> &'static str {
        match self {
            LineCategory::Ack => "ack",
            LineCategory::Nak => "nak",
            LineCategory::CallbackNak => "callback_nak",
            LineCategory::CallbackRegex => "callback_regex",
            LineCategory::CallbackExpectedLines => "callback_expected_lines",
            LineCategory::PushedData => "pushed_data",
            LineCategory::Error => "error",
        }
    }
}

impl fmt::Display for LineCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives traffic events from the protocol engine
pub trait Observer: Send + Sync {
    /// A datagram arrived from `peer`
    fn datagram_received(&self, peer: &AddressLabel);

    /// A datagram was written towards the device
    fn datagram_sent(&self, peer: &AddressLabel);

    /// A line or datagram was classified
    fn line_categorized(&self, category: LineCategory, peer: &AddressLabel);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn datagram_received(&self, _peer: &AddressLabel) {}
    fn datagram_sent(&self, _peer: &AddressLabel) {}
    fn line_categorized(&self, _category: LineCategory, _peer: &AddressLabel) {}
}

/// Observer that emits trace events tagged with the peer
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn datagram_received(&self, peer: &AddressLabel) {
        trace!(host = %peer.host(), port = %peer.port(), "datagram received");
    }

    fn datagram_sent(&self, peer: &AddressLabel) {
        trace!(host = %peer.host(), port = %peer.port(), "datagram sent");
    }

    fn line_categorized(&self, category: LineCategory, peer: &AddressLabel) {
        trace!(
            host = %peer.host(),
            port = %peer.port(),
            category = category.as_str(),
            "line categorized"
        );
    }
}

/// In-memory counters
#[derive(Debug, Default)]
pub struct CountingObserver {
    received: AtomicU64,
    sent: AtomicU64,
    lines: Mutex<HashMap<(AddressLabel, LineCategory), u64>>,
}

impl CountingObserver {
    /// Creates an observer with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Total datagrams received
    pub fn datagrams_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Total datagrams sent
    pub fn datagrams_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Lines in `category` across all peers
    pub fn lines(&self, category: LineCategory) -> u64 {
        self.lines
            .lock()
            .map(|lines| {
                lines
                    .iter()
                    .filter(|((_, c), _)| *c == category)
                    .map(|(_, count)| count)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Lines in `category` tagged with `peer`
    pub fn lines_from(&self, peer: &AddressLabel, category: LineCategory) -> u64 {
        self.lines
            .lock()
            .map(|lines| lines.get(&(*peer, category)).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Observer for CountingObserver {
    fn datagram_received(&self, _peer: &AddressLabel) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn datagram_sent(&self, _peer: &AddressLabel) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn line_categorized(&self, category: LineCategory, peer: &AddressLabel) {
        if let Ok(mut lines) = self.lines.lock() {
            *lines.entry((*peer, category)).or_insert(0) += 1;
        }
    }
}
