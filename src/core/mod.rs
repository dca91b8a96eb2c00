//! Core types and traits for the SymNet link
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

use std::time::Duration;

pub use self::error::{Error, Result};
pub use self::types::{
    AddressLabel,
    Config,
    StateUpdate,
};

/// Port the device listens on for control commands
pub const DEFAULT_REMOTE_PORT: u16 = 48630;

/// Local port replies and push data are sent back to
pub const DEFAULT_LOCAL_PORT: u16 = 48631;

/// Default time to wait for a correlated reply
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest reply timeout accepted; the timer wheel cannot schedule much further out
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Maximum datagram size in bytes
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Default depth of the handle-to-engine command channel
pub const DEFAULT_COMMAND_BUFFER: usize = 64;
