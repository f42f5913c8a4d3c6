// ============================================
// File: crates/gatesplice-proxy/src/error.rs
// ============================================
//! # Proxy Error Types
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use gatesplice_common::error::CommonError;
use gatesplice_core::error::CoreError;

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy error types.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("Hook registration failed: {reason}")]
    Registration { reason: String },

    #[error("Module '{name}' failed to load: {reason}")]
    ModuleLoad { name: String, reason: String },

    #[error("Handshake violation: {reason}")]
    Handshake { reason: String },

    #[error("Cannot synthesize message: {reason}")]
    Inject { reason: String },

    #[error("Dispatcher is no longer attached to a connection")]
    Detached,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    pub fn module_load(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleLoad {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    pub fn inject(reason: impl Into<String>) -> Self {
        Self::Inject {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error must terminate the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Handshake { .. } | Self::Io(_) => true,
            Self::Core(core) => core.is_framing_error() || !core.is_codec_error(),
            _ => false,
        }
    }
}

// ============================================
// Tests
// ============================================
