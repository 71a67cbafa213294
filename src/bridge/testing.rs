//! In-process session factory for tests.
//!
//! [`MockFactory`] hands out sessions whose shells are fed through an mpsc
//! channel and whose exec output is scripted by command substring. Every
//! session and shell shares the factory's state, so tests can count opens,
//! disconnects and closes, push output, and read back what was written.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::BridgeError;
use super::factory::{
    ExecOutput, HostTarget, PtyGeometry, RemoteSession, SessionFactory, SessionKind, ShellReader,
    ShellWriter,
};

type ExecScript = Result<ExecOutput, BridgeError>;

#[derive(Default)]
struct MockState {
    connect_calls: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_disconnected: AtomicUsize,
    shells_closed: AtomicUsize,
    rejected_password: Mutex<Option<String>>,
    unreachable: AtomicBool,
    fail_shell_open: AtomicBool,
    fail_shell_reads: AtomicBool,
    fail_shell_writes: AtomicBool,
    fail_disconnect: AtomicBool,
    echo: AtomicBool,
    exec_scripts: Mutex<Vec<(String, ExecScript)>>,
    exec_delays: Mutex<Vec<(String, Duration)>>,
    exec_log: Mutex<Vec<String>>,
    written: Mutex<Vec<u8>>,
    shells: Mutex<Vec<ShellHandle>>,
}

#[derive(Clone)]
struct ShellHandle {
    feed: mpsc::UnboundedSender<Vec<u8>>,
    closed: CancellationToken,
}

/// Scriptable [`SessionFactory`].
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject authentication for this password.
    pub fn reject_password(&self, password: &str) {
        *self.state.rejected_password.lock().unwrap() = Some(password.to_string());
    }

    /// Make every connect fail as if the host were unreachable.
    pub fn unreachable(&self) {
        self.state.unreachable.store(true, Ordering::SeqCst);
    }

    pub fn fail_shell_open(&self) {
        self.state.fail_shell_open.store(true, Ordering::SeqCst);
    }

    pub fn fail_shell_reads(&self) {
        self.state.fail_shell_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_shell_writes(&self) {
        self.state.fail_shell_writes.store(true, Ordering::SeqCst);
    }

    /// Disconnect still takes effect but reports an error.
    pub fn fail_disconnect(&self) {
        self.state.fail_disconnect.store(true, Ordering::SeqCst);
    }

    /// Shells answer `echo <text>\n` input with `<text>\r\n` output.
    pub fn echo_shell(&self) {
        self.state.echo.store(true, Ordering::SeqCst);
    }

    /// Commands containing `pattern` print `stdout` and exit 0.
    pub fn script_exec(&self, pattern: &str, stdout: &str) {
        self.state.exec_scripts.lock().unwrap().push((
            pattern.to_string(),
            Ok(ExecOutput {
                stdout: stdout.to_string(),
                exit_code: Some(0),
                ..Default::default()
            }),
        ));
    }

    /// Commands containing `pattern` exit non-zero with `stderr`.
    pub fn script_exec_failure(&self, pattern: &str, stderr: &str) {
        self.state.exec_scripts.lock().unwrap().push((
            pattern.to_string(),
            Ok(ExecOutput {
                stderr: stderr.to_string(),
                exit_code: Some(1),
                ..Default::default()
            }),
        ));
    }

    /// Commands containing `pattern` fail at the channel level.
    pub fn script_exec_error(&self, pattern: &str, error: BridgeError) {
        self.state
            .exec_scripts
            .lock()
            .unwrap()
            .push((pattern.to_string(), Err(error)));
    }

    /// Commands containing `pattern` take `delay` before answering.
    pub fn delay_exec(&self, pattern: &str, delay: Duration) {
        self.state
            .exec_delays
            .lock()
            .unwrap()
            .push((pattern.to_string(), delay));
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_disconnected(&self) -> usize {
        self.state.sessions_disconnected.load(Ordering::SeqCst)
    }

    pub fn shells_closed(&self) -> usize {
        self.state.shells_closed.load(Ordering::SeqCst)
    }

    /// Commands run so far, in order.
    pub fn exec_log(&self) -> Vec<String> {
        self.state.exec_log.lock().unwrap().clone()
    }

    /// Everything written to any shell.
    pub fn written_input(&self) -> Vec<u8> {
        self.state.written.lock().unwrap().clone()
    }

    /// Output feed of the most recently opened shell.
    pub fn last_shell_feed(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.state
            .shells
            .lock()
            .unwrap()
            .last()
            .map(|shell| shell.feed.clone())
    }

    /// Simulate the remote side closing the most recent shell.
    pub fn close_remote_shell(&self) {
        if let Some(shell) = self.state.shells.lock().unwrap().last() {
            shell.closed.cancel();
        }
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn connect(
        &self,
        target: &HostTarget,
        _kind: SessionKind,
        _timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>, BridgeError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(BridgeError::Network(format!(
                "Failed to connect: {} unreachable",
                target.host
            )));
        }

        let rejected = self.state.rejected_password.lock().unwrap().clone();
        if rejected.as_deref() == Some(target.password.as_str()) {
            return Err(BridgeError::Auth(format!(
                "password authentication rejected for {}",
                target.display_name()
            )));
        }

        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            state: self.state.clone(),
            connected: AtomicBool::new(true),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
    connected: AtomicBool,
}

#[async_trait]
impl RemoteSession for MockSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, BridgeError> {
        self.state.exec_log.lock().unwrap().push(command.to_string());

        let delay = self
            .state
            .exec_delays
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Ok(ExecOutput {
                    timed_out: true,
                    ..Default::default()
                });
            }
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .state
            .exec_scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, script)| script.clone());

        scripted.unwrap_or_else(|| {
            Ok(ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            })
        })
    }

    async fn open_shell(
        &self,
        _pty: &PtyGeometry,
    ) -> Result<(Box<dyn ShellReader>, Box<dyn ShellWriter>), BridgeError> {
        if self.state.fail_shell_open.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("Shell request failed".into()));
        }

        let (feed, rx) = mpsc::unbounded_channel();
        let handle = ShellHandle {
            feed,
            closed: CancellationToken::new(),
        };
        self.state.shells.lock().unwrap().push(handle.clone());

        Ok((
            Box::new(MockShellReader {
                state: self.state.clone(),
                rx,
                closed: handle.closed.clone(),
                pending: Vec::new(),
            }),
            Box::new(MockShellWriter {
                state: self.state.clone(),
                shell: handle,
            }),
        ))
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.connected.store(false, Ordering::SeqCst);
        self.state.sessions_disconnected.fetch_add(1, Ordering::SeqCst);

        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("Disconnect failed: broken pipe".into()));
        }
        Ok(())
    }
}

struct MockShellReader {
    state: Arc<MockState>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: CancellationToken,
    pending: Vec<u8>,
}

#[async_trait]
impl ShellReader for MockShellReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        if self.state.fail_shell_reads.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("connection reset by peer".into()));
        }

        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.drain(..n);
                return Ok(n);
            }

            tokio::select! {
                biased;

                data = self.rx.recv() => match data {
                    Some(data) => self.pending.extend_from_slice(&data),
                    None => return Ok(0),
                },
                _ = self.closed.cancelled() => return Ok(0),
            }
        }
    }
}

struct MockShellWriter {
    state: Arc<MockState>,
    shell: ShellHandle,
}

#[async_trait]
impl ShellWriter for MockShellWriter {
    async fn write(&self, data: &[u8]) -> Result<(), BridgeError> {
        if self.state.fail_shell_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("Failed to write to shell".into()));
        }

        self.state.written.lock().unwrap().extend_from_slice(data);

        if self.state.echo.load(Ordering::SeqCst) {
            let input = String::from_utf8_lossy(data);
            if let Some(text) = input.trim_end_matches(['\r', '\n']).strip_prefix("echo ") {
                let _ = self.shell.feed.send(format!("{}\r\n", text).into_bytes());
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.state.shells_closed.fetch_add(1, Ordering::SeqCst);
        self.shell.closed.cancel();
        Ok(())
    }
}
