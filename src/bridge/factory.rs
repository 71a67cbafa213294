//! Session factory abstractions.
//!
//! A [`SessionFactory`] opens an authenticated [`RemoteSession`]. A session can
//! run one-shot commands over exec channels and open an interactive PTY shell,
//! which is handed out as two halves: a [`ShellReader`] owned by the output
//! pump and a [`ShellWriter`] owned by the connection for input.
//!
//! The production implementation lives in [`crate::bridge::client`]. The
//! factory never retries; retry policy belongs to callers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::error::BridgeError;

/// Where and as whom to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl HostTarget {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// `user@host:port`, safe for logs.
    pub fn display_name(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl fmt::Debug for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Pseudo-terminal request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyGeometry {
    pub term: &'static str,
    pub cols: u32,
    pub rows: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Default for PtyGeometry {
    fn default() -> Self {
        Self {
            term: "xterm",
            cols: 80,
            rows: 24,
            pixel_width: 640,
            pixel_height: 480,
        }
    }
}

/// What a session will be used for. Interactive sessions have no inactivity
/// timeout; diagnostic sessions do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Interactive,
    Diagnostic,
}

/// Collected output of one exec channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the server sent no exit status (or on timeout).
    pub exit_code: Option<u32>,
    /// The command hit its timeout; output is partial.
    pub timed_out: bool,
}

/// Read half of an interactive shell channel.
#[async_trait]
pub trait ShellReader: Send {
    /// Read up to `buf.len()` bytes of shell output.
    ///
    /// Blocks until data arrives. Returns `Ok(0)` once the channel has
    /// reached end-of-stream or was closed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError>;
}

/// Write half of an interactive shell channel.
#[async_trait]
pub trait ShellWriter: Send + Sync {
    /// Write raw bytes to the shell's input.
    async fn write(&self, data: &[u8]) -> Result<(), BridgeError>;

    /// Close the channel. Unblocks a pending read on the other half.
    async fn close(&self) -> Result<(), BridgeError>;
}

/// An authenticated session with a remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Whether the underlying transport is still up.
    fn is_connected(&self) -> bool;

    /// Run one command on a fresh exec channel, bounded by `timeout`.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, BridgeError>;

    /// Open an interactive shell channel with a pseudo-terminal.
    async fn open_shell(
        &self,
        pty: &PtyGeometry,
    ) -> Result<(Box<dyn ShellReader>, Box<dyn ShellWriter>), BridgeError>;

    /// Disconnect the session.
    async fn disconnect(&self) -> Result<(), BridgeError>;
}

/// A session together with its open shell channel.
pub struct InteractiveSession {
    pub session: Arc<dyn RemoteSession>,
    pub reader: Box<dyn ShellReader>,
    pub writer: Box<dyn ShellWriter>,
}

/// Opens authenticated sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Connect and authenticate, bounded by `timeout`.
    ///
    /// Fails with [`BridgeError::Auth`] or [`BridgeError::Network`].
    async fn connect(
        &self,
        target: &HostTarget,
        kind: SessionKind,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>, BridgeError>;

    /// Connect and open a PTY shell on the new session.
    ///
    /// If the shell cannot be opened the session is disconnected before the
    /// error is returned.
    async fn open_interactive(
        &self,
        target: &HostTarget,
        timeout: Duration,
    ) -> Result<InteractiveSession, BridgeError> {
        let session = self
            .connect(target, SessionKind::Interactive, timeout)
            .await?;

        match session.open_shell(&PtyGeometry::default()).await {
            Ok((reader, writer)) => Ok(InteractiveSession {
                session,
                reader,
                writer,
            }),
            Err(e) => {
                if let Err(close_err) = session.disconnect().await {
                    warn!(
                        "Error disconnecting {} after shell open failure: {}",
                        target.display_name(),
                        close_err
                    );
                }
                Err(match e {
                    BridgeError::Network(msg) => BridgeError::Network(msg),
                    other => BridgeError::Network(other.to_string()),
                })
            }
        }
    }
}
