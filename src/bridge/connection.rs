//! One live interactive shell.
//!
//! A [`Connection`] exclusively owns one authenticated session and the PTY
//! shell channel bound to it. The read half of the channel is handed to the
//! output pump exactly once; the write half stays here for input.
//!
//! # Lifecycle
//!
//! `Open` -> `Closed`. [`Connection::shutdown`] performs teardown at most once,
//! whichever caller gets there first: it cancels the pump, closes the channel,
//! then disconnects the session. Teardown errors are logged and swallowed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::factory::{InteractiveSession, RemoteSession, ShellReader, ShellWriter};
use super::types::{ConnectionInfo, ConnectionStatus};

/// State for one interactive shell connection.
pub struct Connection {
    info: ConnectionInfo,
    session: Arc<dyn RemoteSession>,
    writer: Box<dyn ShellWriter>,
    reader: Mutex<Option<Box<dyn ShellReader>>>,
    /// Token to cancel the output pump
    cancel_token: CancellationToken,
    status_tx: watch::Sender<ConnectionStatus>,
    torn_down: AtomicBool,
}

impl Connection {
    pub fn new(info: ConnectionInfo, parts: InteractiveSession) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Open);
        Self {
            info,
            session: parts.session,
            writer: parts.writer,
            reader: Mutex::new(Some(parts.reader)),
            cancel_token: CancellationToken::new(),
            status_tx,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.connection_id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Both the shell channel and the session are up.
    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open && self.session.is_connected()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Hand the read half to the output pump. Returns `None` after the first call.
    pub(crate) async fn take_reader(&self) -> Option<Box<dyn ShellReader>> {
        self.reader.lock().await.take()
    }

    pub(crate) fn writer(&self) -> &dyn ShellWriter {
        self.writer.as_ref()
    }

    /// Record that the shell channel is no longer delivering output.
    pub(crate) fn mark_channel_closed(&self) {
        self.status_tx.send_replace(ConnectionStatus::Closed);
    }

    /// Tear down the channel and the session. Runs at most once.
    pub async fn shutdown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            debug!("Connection {} already torn down", self.id());
            return;
        }

        self.cancel_token.cancel();
        self.status_tx.send_replace(ConnectionStatus::Closed);

        if let Err(e) = self.writer.close().await {
            warn!("Error closing shell channel for {}: {}", self.id(), e);
        }

        if let Err(e) = self.session.disconnect().await {
            warn!("Error disconnecting session for {}: {}", self.id(), e);
        }

        info!(
            "Connection {} closed ({}@{}:{})",
            self.id(),
            self.info.username,
            self.info.host,
            self.info.port
        );
    }
}
