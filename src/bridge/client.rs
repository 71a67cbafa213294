//! russh-backed session factory.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: keepalive every 30 seconds; interactive
//!    sessions have no inactivity timeout, diagnostic sessions use the connect
//!    timeout.
//!
//! 2. **Connection Establishment**: TCP connect, SSH handshake and password
//!    authentication, all bounded by one timeout.
//!
//! 3. **Channels**: exec channels for one-shot commands, a PTY shell channel
//!    split into read and write halves for interactive use.
//!
//! No retries are attempted here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Disconnect, client};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::auth::{AuthStrategy, PasswordAuth};
use super::error::{BridgeError, classify_connect_error};
use super::factory::{
    ExecOutput, HostTarget, PtyGeometry, RemoteSession, SessionFactory, SessionKind, ShellReader,
    ShellWriter,
};
use super::session::SshClientHandler;

/// Keepalive interval for all sessions
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Build russh client configuration.
///
/// Interactive sessions disable the inactivity timeout so an idle shell is not
/// dropped; keepalives still detect dead peers.
pub(crate) fn build_client_config(timeout: Duration, kind: SessionKind) -> Arc<client::Config> {
    let inactivity_timeout = match kind {
        SessionKind::Interactive => None,
        SessionKind::Diagnostic => Some(timeout),
    };

    Arc::new(client::Config {
        inactivity_timeout,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        ..Default::default()
    })
}

/// Session factory that speaks SSH through russh.
#[derive(Debug, Default)]
pub struct SshSessionFactory;

impl SshSessionFactory {
    pub fn new() -> Self {
        Self
    }

    async fn establish(
        target: &HostTarget,
        kind: SessionKind,
        timeout: Duration,
    ) -> Result<client::Handle<SshClientHandler>, BridgeError> {
        let config = build_client_config(timeout, kind);

        let mut handle = client::connect(
            config,
            (target.host.as_str(), target.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| classify_connect_error(&format!("Failed to connect: {}", e)))?;

        let auth = PasswordAuth::new(target.password.clone());
        let success = auth.authenticate(&mut handle, &target.username).await?;

        if !success {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "Authentication failed", "en")
                .await;
            return Err(BridgeError::Auth(format!(
                "{} authentication rejected for {}",
                auth.name(),
                target.display_name()
            )));
        }

        Ok(handle)
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn connect(
        &self,
        target: &HostTarget,
        kind: SessionKind,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>, BridgeError> {
        debug!(
            "Opening {:?} SSH session to {} with timeout {}s",
            kind,
            target.display_name(),
            timeout.as_secs()
        );

        let handle = tokio::time::timeout(timeout, Self::establish(target, kind, timeout))
            .await
            .map_err(|_| {
                BridgeError::Network(format!(
                    "Connection to {} timed out after {:?}",
                    target.display_name(),
                    timeout
                ))
            })??;

        info!("SSH session established: {}", target.display_name());
        Ok(Arc::new(SshSession { handle }))
    }
}

/// An authenticated russh session.
pub struct SshSession {
    handle: client::Handle<SshClientHandler>,
}

#[async_trait]
impl RemoteSession for SshSession {
    fn is_connected(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, BridgeError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| BridgeError::Network(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| BridgeError::Network(format!("Failed to execute command: {}", e)))?;

        let mut stdout = Vec::with_capacity(4096);
        let mut stderr = Vec::with_capacity(1024);
        let mut exit_code: Option<u32> = None;

        let result = tokio::time::timeout(timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    // ext == 1 is stderr in SSH protocol
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        stderr.extend_from_slice(&data)
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                    Some(ChannelMsg::Eof) => {
                        if exit_code.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;

        let timed_out = result.is_err();
        if timed_out {
            warn!(
                "Command timed out after {:?} ({} bytes stdout so far): {}",
                timeout,
                stdout.len(),
                command
            );
        }

        let _ = channel.close().await;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: if timed_out { None } else { exit_code },
            timed_out,
        })
    }

    async fn open_shell(
        &self,
        pty: &PtyGeometry,
    ) -> Result<(Box<dyn ShellReader>, Box<dyn ShellWriter>), BridgeError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| BridgeError::Network(format!("Failed to open shell channel: {}", e)))?;

        channel
            .request_pty(
                true,
                pty.term,
                pty.cols,
                pty.rows,
                pty.pixel_width,
                pty.pixel_height,
                &[],
            )
            .await
            .map_err(|e| BridgeError::Network(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| BridgeError::Network(format!("Shell request failed: {}", e)))?;

        let (read_half, write_half) = channel.split();

        Ok((
            Box::new(SshShellReader {
                read_half,
                pending: Vec::new(),
            }),
            Box::new(SshShellWriter {
                write_half: Mutex::new(write_half),
            }),
        ))
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "Session closed", "en")
            .await
            .map_err(|e| BridgeError::Network(format!("Disconnect failed: {}", e)))
    }
}

/// Read half of a russh shell channel.
///
/// russh delivers output as messages of arbitrary size; `pending` holds what
/// did not fit in the caller's buffer.
struct SshShellReader {
    read_half: ChannelReadHalf,
    pending: Vec<u8>,
}

#[async_trait]
impl ShellReader for SshShellReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.drain(..n);
                return Ok(n);
            }

            match self.read_half.wait().await {
                // A PTY merges stderr into the terminal stream
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    self.pending.extend_from_slice(&data);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(0),
                Some(_) => {}
            }
        }
    }
}

/// Write half of a russh shell channel.
struct SshShellWriter {
    write_half: Mutex<ChannelWriteHalf<client::Msg>>,
}

#[async_trait]
impl ShellWriter for SshShellWriter {
    async fn write(&self, data: &[u8]) -> Result<(), BridgeError> {
        self.write_half
            .lock()
            .await
            .data(data)
            .await
            .map_err(|e| BridgeError::Network(format!("Failed to write to shell: {}", e)))
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.write_half
            .lock()
            .await
            .close()
            .await
            .map_err(|e| BridgeError::Network(format!("Failed to close shell channel: {}", e)))
    }
}
