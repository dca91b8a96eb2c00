use std::io;
use std::time::Duration;
use thiserror::Error;

/// Custom error types for the SymNet link
#[derive(Error, Debug)]
pub enum Error {
    /// Socket failure that does not end the link by itself
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The device answered a pending command with a bare NAK
    #[error("Command rejected by device: {payload:?}")]
    Nak {
        /// Raw datagram text that carried the NAK
        payload: String,
    },

    /// No matching reply arrived before the deadline
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// The caller-supplied reply transform failed
    #[error("Reply handler failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A push-data line did not follow `#DDDDD=[-]DDDD[D]`
    #[error("Parse error in line {line:?}: {reason}")]
    Parse {
        /// Offending line
        line: String,
        /// Why it was rejected
        reason: String,
    },

    /// Unrecoverable transport failure; the engine has to be torn down
    #[error("Transport failure: {0}")]
    TransportFatal(String),

    /// The engine task has stopped and cannot take or resolve work
    #[error("Protocol engine is closed")]
    EngineClosed,

    /// Rejected configuration or registration parameter
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new NAK failure
    pub fn nak(payload: impl Into<String>) -> Self {
        Error::Nak {
            payload: payload.into(),
        }
    }

    /// Creates a new parse error
    pub fn parse(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new fatal transport error
    pub fn transport_fatal(msg: impl Into<String>) -> Self {
        Error::TransportFatal(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Wraps a failure raised by a reply transform
    pub fn callback(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Callback(err.into())
    }

    /// Whether the engine that produced this error must be torn down
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::TransportFatal(_) | Error::EngineClosed)
    }
}
