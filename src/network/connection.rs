use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info};

use crate::core::{Config, Result};
use crate::metrics::Observer;
use crate::protocol::{
    codec::DatagramCodec,
    engine::ProtocolEngine,
    expectation::ResultSlot,
    matcher::MatchRule,
    sink::{state_channel, StateUpdateStream},
};
use super::EngineHandle;

/// Work sent from handles to the connection task
pub(crate) enum Command {
    /// Write a datagram
    Send(Bytes),
    /// Start waiting for a reply
    Register {
        rule: MatchRule,
        timeout: Duration,
        slot: ResultSlot,
    },
    /// Start waiting for a reply, then write the command it answers
    Request {
        command: Bytes,
        rule: MatchRule,
        timeout: Duration,
        slot: ResultSlot,
    },
}

/// Owns the UDP socket and the protocol engine of one device link.
///
/// Every engine entry point runs inside [`Connection::run`], so handle
/// commands, inbound datagrams and timeouts never interleave.
pub struct Connection {
    /// UDP socket connected to the device
    socket: UdpSocket,
    /// Dispatch state
    engine: ProtocolEngine,
    /// Datagram codec
    codec: DatagramCodec,
    /// Commands from engine handles
    command_rx: mpsc::Receiver<Command>,
    /// Buffer for receiving data
    recv_buffer: Vec<u8>,
    /// Buffer for encoding outgoing data
    send_buffer: BytesMut,
}

impl Connection {
    /// Binds the local socket and connects it to the device.
    ///
    /// Returns the connection, a handle for issuing commands and the stream
    /// of pushed state updates.
    pub async fn bind(
        config: &Config,
        observer: Arc<dyn Observer>,
    ) -> Result<(Self, EngineHandle, StateUpdateStream)> {
        config.validate()?;

        let socket = UdpSocket::bind(config.local_addr).await?;
        socket.connect(config.remote_addr).await?;
        info!(
            local = %socket.local_addr()?,
            remote = %config.remote_addr,
            "device link bound"
        );

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (sink, stream) = state_channel();

        let connection = Connection {
            socket,
            engine: ProtocolEngine::new(sink, observer),
            codec: DatagramCodec::new(),
            command_rx,
            recv_buffer: vec![0; config.max_datagram_size],
            send_buffer: BytesMut::new(),
        };
        let handle = EngineHandle::new(command_tx, config.default_timeout);

        Ok((connection, handle, stream))
    }

    /// Returns the local socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Runs the link until every handle is dropped or the transport fails.
    ///
    /// A fatal transport error fails all pending expectations and is returned.
    /// Expectations still pending on a clean stop resolve with
    /// [`crate::Error::EngineClosed`].
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await?,
                    None => {
                        debug!(pending = self.engine.pending(), "all handles dropped, stopping");
                        return Ok(());
                    }
                },

                received = self.socket.recv_from(&mut self.recv_buffer) => match received {
                    Ok((size, peer)) => {
                        let mut payload = BytesMut::from(&self.recv_buffer[..size]);
                        match self.codec.decode(&mut payload)? {
                            Some(datagram) => {
                                self.engine.dispatch(datagram, peer);
                            }
                            None => {
                                self.engine.on_datagram_received(&[], peer);
                            }
                        }
                    }
                    Err(e) => self.engine.on_transport_error(&e)?,
                },

                _ = self.engine.next_timeout() => {}
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Send(bytes) => self.write(bytes).await,
            // A rejected registration has already failed its slot.
            Command::Register { rule, timeout, slot } => {
                let _ = self.engine.register_slot(rule, timeout, slot);
                Ok(())
            }
            Command::Request { command, rule, timeout, slot } => {
                // Nobody waits for the reply of a rejected request, so skip the write.
                match self.engine.register_slot(rule, timeout, slot) {
                    Ok(_) => self.write(command).await,
                    Err(_) => Ok(()),
                }
            }
        }
    }

    async fn write(&mut self, bytes: Bytes) -> Result<()> {
        debug!(command = ?String::from_utf8_lossy(&bytes), "sending command");
        self.send_buffer.clear();
        self.codec.encode(bytes, &mut self.send_buffer)?;

        match self.socket.send(&self.send_buffer).await {
            Ok(_) => {
                self.engine.record_sent();
                Ok(())
            }
            Err(e) => self.engine.on_transport_error(&e),
        }
    }
}
