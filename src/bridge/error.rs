//! Error taxonomy for the terminal bridge.
//!
//! Every failure that crosses a module boundary is a [`BridgeError`]. Connect
//! and handshake failures reported by the SSH stack arrive as free-form text,
//! so they are classified by message pattern into authentication failures and
//! network failures.
//!
//! # Classification Strategy
//!
//! 1. **Authentication failures**: wrong passwords, rejected methods, denied
//!    access. Reported as [`BridgeError::Auth`].
//!
//! 2. **Everything else**: connection refused, timeouts, unreachable hosts,
//!    handshake or channel-open refusals. Reported as [`BridgeError::Network`].
//!
//! Authentication patterns take precedence. A message such as
//! "Connection timeout during authentication failed" is an authentication
//! failure.
//!
//! # Examples
//!
//! ```rust
//! use webssh_bridge::bridge::error::{BridgeError, classify_connect_error};
//!
//! assert!(matches!(classify_connect_error("Permission denied"), BridgeError::Auth(_)));
//! assert!(matches!(classify_connect_error("Connection refused"), BridgeError::Network(_)));
//! ```

use thiserror::Error;

/// Failures surfaced by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Credentials rejected or the authentication handshake failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connect timeout, unreachable host, or a refused channel.
    #[error("network error: {0}")]
    Network(String),

    /// Unknown connection id or host id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A remote command ran but exited with a failure status.
    #[error("command failed: {0}")]
    Command(String),

    /// Remote output was not in the expected shape.
    #[error("unexpected output: {0}")]
    Parse(String),

    /// Request rejected before any remote I/O took place.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The connection already has an output pump.
    #[error("connection {0} is already streaming")]
    AlreadyStreaming(String),
}

impl BridgeError {
    /// Short machine-readable kind, used in response envelopes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Auth(_) => "auth",
            BridgeError::Network(_) => "network",
            BridgeError::NotFound(_) => "not_found",
            BridgeError::Command(_) => "command",
            BridgeError::Parse(_) => "parse",
            BridgeError::Rejected(_) => "rejected",
            BridgeError::AlreadyStreaming(_) => "already_streaming",
        }
    }
}

/// Authentication error patterns.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
    "too many authentication failures",
];

/// Classifies a connect-time error message as [`BridgeError::Auth`] or
/// [`BridgeError::Network`].
pub fn classify_connect_error(message: &str) -> BridgeError {
    let lower = message.to_lowercase();

    if AUTH_ERRORS.iter().any(|pattern| lower.contains(pattern)) {
        return BridgeError::Auth(message.to_string());
    }

    BridgeError::Network(message.to_string())
}
