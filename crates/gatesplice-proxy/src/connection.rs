// ============================================
// File: crates/gatesplice-proxy/src/connection.rs
// ============================================
//! # Connection
//!
//! ## Creation Reason
//! Drives one proxied session: dials the real server when a client is
//! accepted, walks the key-exchange handshake while relaying it verbatim,
//! then splices decrypted traffic through the dispatcher in both
//! directions.
//!
//! ## Handshake State Machine
//! ```text
//!              server events                    client events
//!            ┌───────────────┐
//!  magic ──► │ AwaitingMagic │  (client bytes relayed untouched)
//!            └───────┬───────┘
//!                    ▼
//!            ┌─────────────────┐   128B ──► clientKeys[0] (both sessions)
//!  128B ──►  │ AwaitingFirst   │
//!  serverKeys[0]   Keys        │
//!            └───────┬─────────┘
//!                    ▼
//!            ┌─────────────────┐   128B ──► clientKeys[1] (both sessions)
//!  128B ──►  │ AwaitingSecond  │
//!  serverKeys[1],
//!  init both └───────┬─────────┘
//!                    ▼
//!            ┌─────────────────┐
//!            │   Established   │  decrypt → frame → dispatch → encrypt
//!            └─────────────────┘
//! ```
//! Only server-side events advance the state; a client key lands in the
//! slot the current state selects. Every handshake datagram is forwarded
//! to the peer unmodified, so the endpoints never notice the proxy.
//!
//! ## Steady State
//! ```text
//! client ──► session1.decrypt ──► clientFrames ──► handle(incoming=false)
//!        ◄── session1.encrypt ◄──────────────────────────────┐
//! server ──► session2.decrypt ──► serverFrames ──► handle(incoming=true)
//!        ◄── session2.encrypt ◄──────────────────────────────┘
//! ```
//! Frames leave in the order they were framed; silenced frames simply do
//! not appear. Messages synthesized by modules are drained after each
//! dispatched frame and whenever the dispatcher signals the wakeup
//! channel.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Key datagrams are accumulated per direction: TCP may split a
//!   128-byte key across segments
//! - Framing and cipher errors are fatal; both sockets close and the
//!   dispatcher is reset (modules torn down)
//!
//! ## Last Modified
//! v0.1.0 - Initial connection implementation

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use gatesplice_common::Direction;
use gatesplice_core::crypto::EXCHANGE_KEY_SIZE;
use gatesplice_core::framing::FrameBuffer;
use gatesplice_core::SessionCipher;

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{ProxyError, Result};

// ============================================
// Constants
// ============================================

/// The magic the server opens with: `1u32` little-endian.
const SERVER_MAGIC: u32 = 1;

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 16 * 1024;

// ============================================
// HandshakeState
// ============================================

/// Handshake progress. Advanced by server-side events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Waiting for the server's `1u32` magic.
    AwaitingMagic,
    /// Waiting for the first key of each side.
    AwaitingFirstKeys,
    /// Waiting for the second key of each side; server's second key
    /// arms the ciphers.
    AwaitingSecondKeys,
    /// Both ciphers live; traffic is framed and dispatched.
    Established,
}

impl HandshakeState {
    /// The key slot a key datagram lands in while in this state.
    const fn key_slot(self) -> Option<usize> {
        match self {
            Self::AwaitingFirstKeys => Some(0),
            Self::AwaitingSecondKeys => Some(1),
            Self::AwaitingMagic | Self::Established => None,
        }
    }
}

// ============================================
// Connection
// ============================================

/// One proxied client↔server session.
pub struct Connection {
    client: TcpStream,
    server_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    max_frame_len: usize,
}

impl Connection {
    /// Creates a connection for an accepted client socket.
    #[must_use]
    pub fn new(
        client: TcpStream,
        server_addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        max_frame_len: usize,
    ) -> Self {
        Self {
            client,
            server_addr,
            dispatcher,
            max_frame_len,
        }
    }

    /// Dials the server and relays until either side closes or a fatal
    /// error occurs. The dispatcher is reset on the way out regardless.
    pub async fn run(self) -> Result<()> {
        let peer = self.client.peer_addr().ok();
        info!(client = ?peer, server = %self.server_addr, "proxying connection");

        let server = TcpStream::connect(self.server_addr).await?;
        server.set_nodelay(true).ok();
        self.client.set_nodelay(true).ok();

        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
        self.dispatcher.attach(wake_tx);

        let (mut client_read, client_write) = self.client.into_split();
        let (mut server_read, server_write) = server.into_split();

        let mut relay = Relay {
            state: HandshakeState::AwaitingMagic,
            session1: SessionCipher::new(),
            session2: SessionCipher::new(),
            client_frames: FrameBuffer::with_limit(self.max_frame_len),
            server_frames: FrameBuffer::with_limit(self.max_frame_len),
            client_pending: BytesMut::new(),
            server_pending: BytesMut::new(),
            client_write,
            server_write,
            dispatcher: self.dispatcher.clone(),
        };

        let mut client_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut server_buf = vec![0u8; READ_BUFFER_SIZE];

        let result = loop {
            tokio::select! {
                read = client_read.read(&mut client_buf) => match read {
                    Ok(0) => {
                        debug!("client closed");
                        break Ok(());
                    }
                    Ok(n) => {
                        if let Err(e) = relay.on_client_data(&mut client_buf[..n]).await {
                            break Err(e);
                        }
                    }
                    Err(e) => break Err(e.into()),
                },
                read = server_read.read(&mut server_buf) => match read {
                    Ok(0) => {
                        debug!("server closed");
                        break Ok(());
                    }
                    Ok(n) => {
                        if let Err(e) = relay.on_server_data(&mut server_buf[..n]).await {
                            break Err(e);
                        }
                    }
                    Err(e) => break Err(e.into()),
                },
                _ = wake_rx.recv() => {
                    if let Err(e) = relay.pump_injections().await {
                        break Err(e);
                    }
                }
            }
        };

        // Half-close the peer of whichever side went away, tear down
        // modules and release the ciphers.
        self.dispatcher.detach();
        self.dispatcher.reset();
        relay.client_write.shutdown().await.ok();
        relay.server_write.shutdown().await.ok();

        match &result {
            Ok(()) => info!(client = ?peer, "connection closed"),
            Err(e) => warn!(client = ?peer, error = %e, "connection terminated"),
        }
        result
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_addr", &self.server_addr)
            .finish()
    }
}

// ============================================
// Relay
// ============================================

/// Mutable relay state for one running connection.
struct Relay {
    state: HandshakeState,
    /// Client↔proxy cipher.
    session1: SessionCipher,
    /// Proxy↔server cipher.
    session2: SessionCipher,
    client_frames: FrameBuffer,
    server_frames: FrameBuffer,
    /// Unconsumed handshake bytes from the client.
    client_pending: BytesMut,
    /// Unconsumed handshake bytes from the server.
    server_pending: BytesMut,
    client_write: OwnedWriteHalf,
    server_write: OwnedWriteHalf,
    dispatcher: Arc<Dispatcher>,
}

impl Relay {
    // ========================================
    // Client → proxy
    // ========================================

    async fn on_client_data(&mut self, chunk: &mut [u8]) -> Result<()> {
        match self.state {
            HandshakeState::AwaitingMagic => {
                // Nothing meaningful can arrive yet; relay untouched.
                trace!(len = chunk.len(), "client bytes before server magic");
                self.server_write.write_all(chunk).await?;
                Ok(())
            }
            HandshakeState::AwaitingFirstKeys | HandshakeState::AwaitingSecondKeys => {
                self.client_pending.extend_from_slice(chunk);
                self.consume_client_keys().await
            }
            HandshakeState::Established => {
                self.session1.decrypt(chunk)?;
                self.client_frames.push(chunk);
                self.drain(Direction::ToServer).await
            }
        }
    }

    /// Captures complete 128-byte client keys into the slot the current
    /// state selects and relays them to the server.
    async fn consume_client_keys(&mut self) -> Result<()> {
        while self.client_pending.len() >= EXCHANGE_KEY_SIZE {
            let Some(slot) = self.state.key_slot() else {
                break;
            };
            let key = self.client_pending.copy_to_bytes(EXCHANGE_KEY_SIZE);

            self.session1.set_client_key(slot, &key)?;
            self.session2.set_client_key(slot, &key)?;
            debug!(slot, "client key captured");

            self.server_write.write_all(&key).await?;
        }

        // Bytes left over after Established (client raced ahead) are
        // encrypted traffic.
        if self.state == HandshakeState::Established && !self.client_pending.is_empty() {
            let mut rest = self.client_pending.split().to_vec();
            self.session1.decrypt(&mut rest)?;
            self.client_frames.push(&rest);
            return Box::pin(self.drain(Direction::ToServer)).await;
        }
        Ok(())
    }

    // ========================================
    // Server → proxy
    // ========================================

    async fn on_server_data(&mut self, chunk: &mut [u8]) -> Result<()> {
        if self.state == HandshakeState::Established {
            self.session2.decrypt(chunk)?;
            self.server_frames.push(chunk);
            return self.drain(Direction::ToClient).await;
        }

        self.server_pending.extend_from_slice(chunk);
        self.consume_server_handshake().await
    }

    async fn consume_server_handshake(&mut self) -> Result<()> {
        loop {
            match self.state {
                HandshakeState::AwaitingMagic => {
                    if self.server_pending.len() < 4 {
                        return Ok(());
                    }
                    let magic = u32::from_le_bytes([
                        self.server_pending[0],
                        self.server_pending[1],
                        self.server_pending[2],
                        self.server_pending[3],
                    ]);
                    if magic != SERVER_MAGIC {
                        return Err(ProxyError::handshake(format!(
                            "expected server magic {SERVER_MAGIC}, got {magic}"
                        )));
                    }

                    let datagram = self.server_pending.copy_to_bytes(4);
                    self.client_write.write_all(&datagram).await?;
                    self.state = HandshakeState::AwaitingFirstKeys;
                    debug!("server magic relayed");
                }
                HandshakeState::AwaitingFirstKeys | HandshakeState::AwaitingSecondKeys => {
                    if self.server_pending.len() < EXCHANGE_KEY_SIZE {
                        return Ok(());
                    }
                    let slot = self.state.key_slot().expect("key states have a slot");
                    let key = self.server_pending.copy_to_bytes(EXCHANGE_KEY_SIZE);

                    self.session1.set_server_key(slot, &key)?;
                    self.session2.set_server_key(slot, &key)?;
                    debug!(slot, "server key captured");

                    self.client_write.write_all(&key).await?;

                    if slot == 0 {
                        self.state = HandshakeState::AwaitingSecondKeys;
                    } else {
                        self.session1.init()?;
                        self.session2.init()?;
                        self.state = HandshakeState::Established;
                        info!("key exchange complete; ciphers armed");

                        // A client key may still be parked in the
                        // accumulator from the race above.
                        self.consume_client_keys().await?;
                    }
                }
                HandshakeState::Established => {
                    if self.server_pending.is_empty() {
                        return Ok(());
                    }
                    let mut rest = self.server_pending.split().to_vec();
                    self.session2.decrypt(&mut rest)?;
                    self.server_frames.push(&rest);
                    return Box::pin(self.drain(Direction::ToClient)).await;
                }
            }
        }
    }

    // ========================================
    // Steady-state splice
    // ========================================

    /// Frames, dispatches and forwards everything buffered for one
    /// direction, draining synthesized messages after each frame.
    async fn drain(&mut self, direction: Direction) -> Result<()> {
        loop {
            let frame = match direction {
                Direction::ToServer => self.client_frames.next_frame()?,
                Direction::ToClient => self.server_frames.next_frame()?,
            };
            let Some(frame) = frame else { break };

            let incoming = direction.is_incoming();
            match self.dispatcher.handle(frame, incoming, false) {
                DispatchOutcome::Forward(bytes) => {
                    self.send(direction, bytes).await?;
                }
                DispatchOutcome::Silenced => {
                    trace!(%direction, "frame silenced");
                }
            }

            self.pump_injections().await?;
        }
        Ok(())
    }

    /// Encrypts and transmits one plaintext frame toward `direction`.
    async fn send(&mut self, direction: Direction, mut bytes: Vec<u8>) -> Result<()> {
        match direction {
            Direction::ToServer => {
                self.session2.encrypt(&mut bytes)?;
                self.server_write.write_all(&bytes).await?;
            }
            Direction::ToClient => {
                self.session1.encrypt(&mut bytes)?;
                self.client_write.write_all(&bytes).await?;
            }
        }
        Ok(())
    }

    /// Sends every frame the dispatcher has ready from module injections.
    async fn pump_injections(&mut self) -> Result<()> {
        for outbound in self.dispatcher.flush_injections() {
            self.send(outbound.direction, outbound.bytes).await?;
        }
        Ok(())
    }
}

// ============================================
// Tests
// ============================================
