//! Protocol implementation module
//!
//! This module defines the SymNet wire format, reply matching, pending
//! expectations and the dispatch engine that ties them together.

pub mod codec;
pub mod engine;
pub mod expectation;
pub mod matcher;
pub mod message;
pub mod sink;

pub use self::codec::DatagramCodec;
pub use self::engine::{Dispatch, ProtocolEngine};
pub use self::expectation::{
    validate_timeout, ExpectationHandle, ExpectationId, ExpectationQueue, Reply, ResultSlot,
};
pub use self::matcher::{matches, MatchDetails, MatchRule};
pub use self::message::{parse_push_line, split_lines, Datagram, DatagramKind, ACK, NAK};
pub use self::sink::{state_channel, StateUpdateSink, StateUpdateStream};
