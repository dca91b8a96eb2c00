use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::core::{AddressLabel, Error, Result};
use crate::metrics::{LineCategory, Observer};
use super::expectation::{self, ExpectationHandle, ExpectationId, Reply, ResultSlot};
use super::matcher::MatchRule;
use super::message::{parse_push_line, Datagram, DatagramKind};
use super::sink::StateUpdateSink;

/// What happened to one inbound datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A bare NAK failed the oldest expectation
    Rejected(ExpectationId),
    /// A reply resolved the expectation through the given rule category
    Resolved {
        /// Expectation that received the reply
        id: ExpectationId,
        /// How it matched
        category: LineCategory,
    },
    /// NAK with nobody waiting
    UnmatchedNak,
    /// ACK with nobody waiting
    Ack,
    /// Treated as push data
    PushData {
        /// Lines turned into state updates
        updates: usize,
        /// Lines that failed to parse
        errors: usize,
    },
}

/// Transport-agnostic protocol engine.
///
/// Owns the expectation queue and decides, for every inbound datagram, which
/// single expectation it resolves or whether it is ACK, NAK or push data.
/// All entry points take `&mut self`; the owner serializes them.
pub struct ProtocolEngine {
    queue: expectation::ExpectationQueue,
    sink: StateUpdateSink,
    observer: Arc<dyn Observer>,
    address: AddressLabel,
}

impl ProtocolEngine {
    /// Creates an engine that publishes push data to `sink`
    pub fn new(sink: StateUpdateSink, observer: Arc<dyn Observer>) -> Self {
        ProtocolEngine {
            queue: expectation::ExpectationQueue::new(),
            sink,
            observer,
            address: AddressLabel::default(),
        }
    }

    /// Registers an expectation for the raw reply
    pub fn register_expectation(
        &mut self,
        rule: MatchRule,
        timeout: Duration,
    ) -> Result<ExpectationHandle<Reply>> {
        let (slot, handle) = expectation::reply_channel();
        self.register_slot(rule, timeout, slot)?;
        Ok(handle)
    }

    /// Registers an expectation whose reply is passed through `transform`
    pub fn register_with<T, E, F>(
        &mut self,
        rule: MatchRule,
        timeout: Duration,
        transform: F,
    ) -> Result<ExpectationHandle<T>>
    where
        T: Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce(Reply) -> std::result::Result<T, E> + Send + 'static,
    {
        let (slot, handle) = expectation::channel(transform);
        self.register_slot(rule, timeout, slot)?;
        Ok(handle)
    }

    /// Appends an already created result slot to the queue and starts its timer.
    ///
    /// A timeout that cannot be scheduled is rejected with [`Error::Config`],
    /// which is also written to the slot; pending expectations are unaffected.
    pub fn register_slot(
        &mut self,
        rule: MatchRule,
        timeout: Duration,
        slot: ResultSlot,
    ) -> Result<ExpectationId> {
        let id = self.queue.push(rule, timeout, slot).map_err(|e| {
            warn!(error = %e, "expectation rejected");
            e
        })?;
        debug!(?id, ?timeout, pending = self.queue.len(), "expectation registered");
        Ok(id)
    }

    /// Decodes and dispatches one inbound datagram
    pub fn on_datagram_received(&mut self, payload: &[u8], peer: SocketAddr) -> Dispatch {
        self.dispatch(Datagram::decode(payload), peer)
    }

    /// Dispatches one decoded datagram: a bare NAK fails the oldest
    /// expectation, otherwise the first expectation whose rule matches takes
    /// the reply, and whatever is left is ACK, NAK or push data.
    pub fn dispatch(&mut self, datagram: Datagram, peer: SocketAddr) -> Dispatch {
        self.address.update(peer);
        self.observer.datagram_received(&self.address);
        debug!(lines = datagram.lines.len(), %peer, "datagram received");

        if datagram.is_nak() {
            if let Some(mut oldest) = self.queue.take_oldest() {
                debug!(id = ?oldest.id(), "NAK forwarded to oldest expectation");
                self.observer.line_categorized(LineCategory::CallbackNak, &self.address);
                oldest.resolve(Err(Error::nak(datagram.text)));
                return Dispatch::Rejected(oldest.id());
            }
        }

        if let Some((mut expectation, details)) = self.queue.take_first_match(&datagram) {
            let category = match expectation.rule() {
                MatchRule::Pattern(_) => LineCategory::CallbackRegex,
                MatchRule::ExactLineCount(_) => LineCategory::CallbackExpectedLines,
            };
            debug!(id = ?expectation.id(), %category, "reply delivered");
            self.observer.line_categorized(category, &self.address);
            expectation.resolve(Ok(Reply {
                payload: datagram.text,
                groups: details.groups,
            }));
            return Dispatch::Resolved {
                id: expectation.id(),
                category,
            };
        }

        match datagram.kind() {
            DatagramKind::Nak => {
                self.observer.line_categorized(LineCategory::Nak, &self.address);
                error!(%peer, "NAK received with no command waiting for a reply");
                Dispatch::UnmatchedNak
            }
            DatagramKind::Ack => {
                self.observer.line_categorized(LineCategory::Ack, &self.address);
                debug!("ACK received with no command waiting, ignoring");
                Dispatch::Ack
            }
            DatagramKind::Other => self.publish_push_data(&datagram),
        }
    }

    fn publish_push_data(&mut self, datagram: &Datagram) -> Dispatch {
        let mut updates = 0;
        let mut errors = 0;

        for line in &datagram.lines {
            match parse_push_line(line) {
                Ok(update) => {
                    self.observer.line_categorized(LineCategory::PushedData, &self.address);
                    debug!(?update, "push data");
                    self.sink.put(update);
                    updates += 1;
                }
                Err(e) => {
                    self.observer.line_categorized(LineCategory::Error, &self.address);
                    error!(error = %e, "discarding unparseable line");
                    errors += 1;
                }
            }
        }

        Dispatch::PushData { updates, errors }
    }

    /// Waits for the next expectation deadline and resolves it with a timeout.
    /// Pends forever while nothing is queued.
    pub async fn next_timeout(&mut self) -> ExpectationId {
        let mut expired = self.queue.next_expired().await;
        warn!(
            id = ?expired.id(),
            timeout = ?expired.timeout(),
            rule = ?expired.rule(),
            "expectation timed out"
        );
        expired.resolve(Err(Error::Timeout(expired.timeout())));
        expired.id()
    }

    /// Handles an error reported by the transport.
    ///
    /// A refused connection is fatal: every pending expectation fails at once
    /// and the error is returned so the owner tears the engine down. Anything
    /// else is logged and ignored.
    pub fn on_transport_error(&mut self, err: &io::Error) -> Result<()> {
        error!(error = %err, "transport error");
        if err.kind() != io::ErrorKind::ConnectionRefused {
            return Ok(());
        }

        error!("unable to reach remote endpoint, shutting down");
        let reason = format!("connection refused: {}", err);
        self.fail_all(&reason);
        Err(Error::transport_fatal(reason))
    }

    /// Resolves and removes every pending expectation with a fatal transport error
    pub fn fail_all(&mut self, reason: &str) -> usize {
        let drained = self.queue.drain();
        let count = drained.len();
        for mut expectation in drained {
            expectation.resolve(Err(Error::transport_fatal(reason)));
        }
        if count > 0 {
            warn!(count, reason, "failed all pending expectations");
        }
        count
    }

    /// Reports a written datagram to the observer
    pub fn record_sent(&self) {
        self.observer.datagram_sent(&self.address);
    }

    /// Number of expectations still waiting
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Most recent peer
    pub fn address_label(&self) -> &AddressLabel {
        &self.address
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("pending", &self.queue.len())
            .field("address", &self.address)
            .finish()
    }
}
