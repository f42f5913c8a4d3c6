// ============================================
// File: crates/gatesplice-proxy/src/lib.rs
// ============================================
//! # Gatesplice Proxy Library
//!
//! ## Creation Reason
//! Provides the proxy itself: the TCP relay that splices into an encrypted
//! game session, the dispatcher that runs every message through an ordered
//! hook pipeline, and the module host user code plugs into.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: Proxy configuration management
//! - [`server`]: TCP listener factory and connection lifecycle
//! - [`connection`]: Handshake state machine and bidirectional splice
//! - [`dispatch`]: Hook registry, dispatcher and hook types
//! - [`modules`]: Module host and the capability wrapper handed to modules
//! - [`error`]: Proxy-specific error types
//!
//! ## Architecture Overview
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         ProxyServer                              │
//! │   accept → Dispatcher + Connection per client, on_dispatch hook  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                         Connection                               │
//! │                                                                  │
//! │  client ──► session1.decrypt ──► FrameBuffer ──┐                 │
//! │                                                ▼                 │
//! │                                      Dispatcher.handle           │
//! │                                                │                 │
//! │  server ◄── session2.encrypt ◄─────────────────┘                 │
//! │                                                                  │
//! │  (server → client is the mirror image with sessions swapped)     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                         Dispatcher                               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │ HookRegistry │  │  ModuleHost  │  │  queued hooks /        │  │
//! │  │ (ordered)    │  │  (wrappers)  │  │  pending injections    │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! socket → cipher.decrypt → FrameBuffer → Dispatcher.handle
//!        → cipher.encrypt → peer socket
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - One dispatcher per connection; no state is shared across connections
//! - Hook callbacks run synchronously inside `handle`; async work must go
//!   through `to_client`/`to_server` on the module wrapper
//!
//! ## Last Modified
//! v0.1.0 - Initial proxy implementation

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod modules;
pub mod server;

// Re-export primary types
pub use config::ProxyConfig;
pub use connection::Connection;
pub use dispatch::{
    DispatchOutcome, DispatchSettings, Dispatcher, EventVerdict, HookContext, HookFilter,
    HookHandle, HookSpec, InjectPayload, RawVerdict,
};
pub use error::{ProxyError, Result};
pub use modules::{Module, ModuleApi, ModuleLoader, StaticLoader};
pub use server::ProxyServer;
