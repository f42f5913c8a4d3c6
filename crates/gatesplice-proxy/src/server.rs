// ============================================
// File: crates/gatesplice-proxy/src/server.rs
// ============================================
//! # Proxy Server
//!
//! ## Creation Reason
//! The listener factory: accepts game clients, builds one dispatcher per
//! connection, lets the embedder load modules on it, and runs the
//! connection to completion.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ProxyServer                          │
//! │                                                             │
//! │  accept ──► Dispatcher::new ──► on_dispatch(dispatcher)     │
//! │                     │          (embedder loads modules)     │
//! │                     ▼                                       │
//! │          Connection::run (own task)                         │
//! │                     │                                       │
//! │        close ──► dispatcher.reset ──► table entry removed   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Dispatchers are strictly per-connection; `on_dispatch` must not
//!   stash cross-connection state on them
//! - Graceful shutdown stops accepting; in-flight connections finish on
//!   their own tasks
//!
//! ## Last Modified
//! v0.1.0 - Initial server implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use gatesplice_core::protocol::ProtocolCodec;

use crate::config::ProxyConfig;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::Result;

// ============================================
// Types
// ============================================

/// Callback invoked with every fresh dispatcher before its connection
/// starts relaying; the place to load modules.
pub type OnDispatch = Arc<dyn Fn(&Arc<Dispatcher>) + Send + Sync>;

/// Bookkeeping for one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// The game client's address.
    pub peer: SocketAddr,
    /// When the connection was accepted.
    pub opened_at: Instant,
}

// ============================================
// ProxyServer
// ============================================

/// TCP listener that splices a proxy into every accepted connection.
///
/// # Lifecycle
/// 1. Create with `ProxyServer::new(config, codec, on_dispatch)`
/// 2. Start with `server.run().await`
/// 3. Stop with `server.shutdown()` (or drop everything)
pub struct ProxyServer {
    config: ProxyConfig,
    codec: Arc<dyn ProtocolCodec>,
    on_dispatch: OnDispatch,
    connections: Arc<DashMap<u64, ConnectionInfo>>,
    next_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProxyServer {
    /// Creates a server instance.
    #[must_use]
    pub fn new(
        config: ProxyConfig,
        codec: Arc<dyn ProtocolCodec>,
        on_dispatch: OnDispatch,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            codec,
            on_dispatch,
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Accepts and proxies connections until shutdown.
    ///
    /// # Errors
    /// Returns error if the listener cannot bind.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.network.listen_addr).await?;
        let local = listener.local_addr()?;
        info!(
            listen = %local,
            server = %self.config.network.server_addr,
            "proxy listening"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received; no longer accepting");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => self.spawn_connection(socket, peer),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        info!(
            in_flight = self.connections.len(),
            "listener stopped; in-flight connections continue"
        );
        Ok(())
    }

    fn spawn_connection(&self, socket: tokio::net::TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            ConnectionInfo {
                peer,
                opened_at: Instant::now(),
            },
        );
        debug!(id, %peer, "connection accepted");

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.codec),
            self.config.dispatch_settings(),
        ));
        (self.on_dispatch)(&dispatcher);

        let connection = Connection::new(
            socket,
            self.config.network.server_addr,
            dispatcher,
            self.config.framing.max_frame_len,
        );

        let connections = Arc::clone(&self.connections);
        tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                debug!(id, error = %e, "connection task ended with error");
            }
            connections.remove(&id);
        });
    }

    /// Stops the accept loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of connections currently being proxied.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("listen_addr", &self.config.network.listen_addr)
            .field("server_addr", &self.config.network.server_addr)
            .field("connections", &self.connection_count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use gatesplice_core::TableCodec;

    const TABLE: &str = r#"{ "maps": {}, "messages": {} }"#;

    fn config(listen: SocketAddr, server: SocketAddr) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.network.listen_addr = listen;
        config.network.server_addr = server;
        config
    }

    async fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_on_dispatch_runs_per_connection() {
        let game_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = game_server.local_addr().unwrap();
        let listen_addr = free_addr().await;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let on_dispatch: OnDispatch = Arc::new(move |dispatcher| {
            assert_eq!(dispatcher.protocol_version(), 0);
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        let server = Arc::new(ProxyServer::new(
            config(listen_addr, server_addr),
            Arc::new(TableCodec::from_json_str(TABLE).unwrap()),
            on_dispatch,
        ));

        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        // Give the listener a moment to bind, then connect twice.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _c1 = TcpStream::connect(listen_addr).await.unwrap();
        let (_s1, _) = game_server.accept().await.unwrap();
        let _c2 = TcpStream::connect(listen_addr).await.unwrap();
        let (_s2, _) = game_server.accept().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(server.connection_count(), 2);

        server.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_relays_handshake_bytes() {
        let game_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = game_server.local_addr().unwrap();
        let listen_addr = free_addr().await;

        let server = Arc::new(ProxyServer::new(
            config(listen_addr, server_addr),
            Arc::new(TableCodec::from_json_str(TABLE).unwrap()),
            Arc::new(|_| {}),
        ));
        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(listen_addr).await.unwrap();
        let (mut game, _) = game_server.accept().await.unwrap();

        game.write_all(&1u32.to_le_bytes()).await.unwrap();
        let mut magic = [0u8; 4];
        client.read_exact(&mut magic).await.unwrap();
        assert_eq!(magic, 1u32.to_le_bytes());

        server.shutdown();
        runner.await.unwrap().unwrap();
    }
}
