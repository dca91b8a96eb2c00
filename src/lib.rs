//! SymNet link: request/response correlation for the SymNet control protocol
//!
//! This library drives the line-oriented text protocol SymNet devices speak
//! over UDP. It matches every reply to the command that caused it, tells
//! replies apart from bare ACK/NAK answers and unsolicited push data, and
//! turns push data into [`StateUpdate`] records for the controller layer.
pub mod core;
pub mod metrics;
pub mod network;
pub mod protocol;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Config, Error, Result, StateUpdate};
pub use crate::metrics::{LineCategory, Observer};
pub use crate::network::{Connection, EngineHandle};
pub use crate::protocol::{ExpectationHandle, MatchRule, ProtocolEngine, Reply, StateUpdateStream};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
