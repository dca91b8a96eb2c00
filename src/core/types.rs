use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Serialize, Deserialize};

use super::{Error, Result};

/// A controller value change pushed by the device without a preceding command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Numeric address of the controller
    pub controller_number: u32,
    /// Reported raw value
    pub controller_value: i32,
}

impl StateUpdate {
    /// Creates a new state update
    pub fn new(controller_number: u32, controller_value: i32) -> Self {
        StateUpdate {
            controller_number,
            controller_value,
        }
    }
}

/// Most recently seen peer, used only to tag observability events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AddressLabel(Option<SocketAddr>);

impl AddressLabel {
    const UNKNOWN: &'static str = "UNKNOWN";

    /// Records a newly seen peer
    pub fn update(&mut self, peer: SocketAddr) {
        self.0 = Some(peer);
    }

    /// Returns the peer address, if any datagram has been received yet
    pub fn peer(&self) -> Option<SocketAddr> {
        self.0
    }

    /// Host tag
    pub fn host(&self) -> String {
        self.0
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| Self::UNKNOWN.to_string())
    }

    /// Port tag
    pub fn port(&self) -> String {
        self.0
            .map(|addr| addr.port().to_string())
            .unwrap_or_else(|| Self::UNKNOWN.to_string())
    }
}

impl fmt::Display for AddressLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{}", addr),
            None => f.write_str(Self::UNKNOWN),
        }
    }
}

/// Configuration for a link to one device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local address to bind to
    pub local_addr: SocketAddr,
    /// Device address commands are sent to
    pub remote_addr: SocketAddr,
    /// Reply timeout used when the caller does not pick one
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub default_timeout: Duration,
    /// Receive buffer size
    pub max_datagram_size: usize,
    /// Depth of the command channel between handles and the engine task
    pub command_buffer: usize,
}

impl Config {
    /// Checks the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(Error::config("default_timeout must be greater than zero"));
        }
        if self.default_timeout > super::MAX_TIMEOUT {
            return Err(Error::config(format!(
                "default_timeout must not exceed {:?}",
                super::MAX_TIMEOUT
            )));
        }
        if self.max_datagram_size == 0 {
            return Err(Error::config("max_datagram_size must be greater than zero"));
        }
        if self.command_buffer == 0 {
            return Err(Error::config("command_buffer must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            local_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, super::DEFAULT_LOCAL_PORT)),
            remote_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, super::DEFAULT_REMOTE_PORT)),
            default_timeout: super::DEFAULT_TIMEOUT,
            max_datagram_size: super::MAX_DATAGRAM_SIZE,
            command_buffer: super::DEFAULT_COMMAND_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_label_unknown_until_updated() {
        let mut label = AddressLabel::default();
        assert_eq!(label.host(), "UNKNOWN");
        assert_eq!(label.port(), "UNKNOWN");
        assert_eq!(label.to_string(), "UNKNOWN");

        label.update("10.0.0.7:48630".parse().unwrap());
        assert_eq!(label.host(), "10.0.0.7");
        assert_eq!(label.port(), "48630");
        assert_eq!(label.to_string(), "10.0.0.7:48630");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        assert_eq!(config.remote_addr.port(), 48630);
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let config = Config {
            default_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_rejects_unschedulable_timeout() {
        let config = Config {
            default_timeout: Duration::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: Config = serde_json::from_str(
            r#"{"remote_addr":"192.168.1.20:48630","default_timeout":0.25}"#,
        )
        .unwrap();
        assert_eq!(config.remote_addr, "192.168.1.20:48630".parse().unwrap());
        assert_eq!(config.default_timeout, Duration::from_millis(250));
        assert_eq!(config.command_buffer, crate::core::DEFAULT_COMMAND_BUFFER);
    }
}
