//! Device link and command routing module
//!
//! This module binds the UDP transport, runs the protocol engine in a single
//! task and hands out cloneable handles for issuing commands.

mod connection;

pub use self::connection::Connection;

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::core::{Error, Result};
use crate::protocol::{
    expectation::{self, ExpectationHandle, Reply},
    matcher::MatchRule,
};
use self::connection::Command;

/// Handle for sending commands through a running [`Connection`]
#[derive(Clone, Debug)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<Command>,
    default_timeout: Duration,
}

impl EngineHandle {
    fn new(command_tx: mpsc::Sender<Command>, default_timeout: Duration) -> Self {
        EngineHandle {
            command_tx,
            default_timeout,
        }
    }

    /// Writes a command to the device. Returning does not imply the device
    /// accepted it.
    pub async fn send(&self, command: impl Into<Bytes>) -> Result<()> {
        self.submit(Command::Send(command.into())).await
    }

    /// Starts waiting for a reply matching `rule`. A timeout above
    /// [`crate::core::MAX_TIMEOUT`] is rejected with [`Error::Config`].
    pub async fn register_expectation(
        &self,
        rule: MatchRule,
        timeout: Duration,
    ) -> Result<ExpectationHandle<Reply>> {
        expectation::validate_timeout(timeout)?;
        let (slot, handle) = expectation::reply_channel();
        self.submit(Command::Register { rule, timeout, slot }).await?;
        Ok(handle)
    }

    /// Starts waiting for a reply matching `rule`, passed through `transform`
    pub async fn register_with<T, E, F>(
        &self,
        rule: MatchRule,
        timeout: Duration,
        transform: F,
    ) -> Result<ExpectationHandle<T>>
    where
        T: Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce(Reply) -> std::result::Result<T, E> + Send + 'static,
    {
        expectation::validate_timeout(timeout)?;
        let (slot, handle) = expectation::channel(transform);
        self.submit(Command::Register { rule, timeout, slot }).await?;
        Ok(handle)
    }

    /// Sends a command and waits for its reply. The expectation is registered
    /// before the command is written, so a fast reply cannot be missed. An
    /// unschedulable timeout fails with [`Error::Config`] and nothing is sent.
    pub async fn request(
        &self,
        command: impl Into<Bytes>,
        rule: MatchRule,
        timeout: Duration,
    ) -> Result<Reply> {
        self.request_with(command, rule, timeout, |reply| {
            Ok::<_, std::convert::Infallible>(reply)
        })
        .await
    }

    /// Sends a command and waits for a reply of exactly `expected_lines`
    /// lines, using the configured default timeout
    pub async fn request_lines(
        &self,
        command: impl Into<Bytes>,
        expected_lines: usize,
    ) -> Result<Reply> {
        let rule = MatchRule::ExactLineCount(expected_lines);
        self.request(command, rule, self.default_timeout).await
    }

    /// Sends a command and waits for its reply, passed through `transform`
    pub async fn request_with<T, E, F>(
        &self,
        command: impl Into<Bytes>,
        rule: MatchRule,
        timeout: Duration,
        transform: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce(Reply) -> std::result::Result<T, E> + Send + 'static,
    {
        expectation::validate_timeout(timeout)?;
        let (slot, handle) = expectation::channel(transform);
        self.submit(Command::Request {
            command: command.into(),
            rule,
            timeout,
            slot,
        })
        .await?;
        handle.await
    }

    /// Reply timeout used by [`EngineHandle::request_lines`]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Whether the connection task has stopped
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    async fn submit(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::EngineClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_engine_rejects_commands() {
        let (tx, rx) = mpsc::channel(1);
        let handle = EngineHandle::new(tx, Duration::from_secs(5));
        drop(rx);

        assert!(handle.is_closed());
        assert!(matches!(handle.send("GS2 1\r").await, Err(Error::EngineClosed)));
        assert!(matches!(
            handle.request_lines("GS2 1\r", 1).await,
            Err(Error::EngineClosed)
        ));
    }

    #[tokio::test]
    async fn test_request_registers_before_writing() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = EngineHandle::new(tx, Duration::from_secs(5));

        let request = tokio::spawn(async move { handle.request_lines("GS2 1\r", 1).await });

        match rx.recv().await {
            Some(Command::Request { command, rule, timeout, mut slot }) => {
                assert_eq!(&command[..], b"GS2 1\r");
                assert!(matches!(rule, MatchRule::ExactLineCount(1)));
                assert_eq!(timeout, Duration::from_secs(5));
                slot.resolve(Ok(Reply {
                    payload: "1 0\r".to_string(),
                    groups: vec![],
                }));
            }
            _ => panic!("expected a request command"),
        }

        assert_eq!(request.await.unwrap().unwrap().payload, "1 0\r");
    }

    #[tokio::test]
    async fn test_unschedulable_timeout_never_reaches_engine() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = EngineHandle::new(tx, Duration::from_secs(5));

        let request = handle.request("GS2 1\r", MatchRule::ExactLineCount(1), Duration::MAX);
        assert!(matches!(request.await, Err(Error::Config(_))));
        let registered = handle
            .register_expectation(MatchRule::ExactLineCount(1), Duration::MAX)
            .await;
        assert!(matches!(registered, Err(Error::Config(_))));
        assert!(rx.try_recv().is_err());

        handle.send("CS 1 0\r").await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(Command::Send(_))));
    }
}
