//! Terminal bridge: output pump and input forwarding.
//!
//! Each connection gets one pump task. The pump reads the shell channel into a
//! 4096-byte buffer, decodes UTF-8 and delivers every non-empty read as one
//! `output` event to the connection's subscriber. One task per connection
//! means output for a subscriber is delivered in read order.
//!
//! The pump stops when the channel reports end-of-stream, when a read fails,
//! or when the connection is shut down. Shutdown cancels the pump's token and
//! closes the channel, so a read blocked on a silent peer is released instead
//! of leaking the task. The pump never tears the connection down itself; it
//! only marks the channel closed and reports how it ended.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::delivery::EventSink;
use super::error::BridgeError;
use super::types::TerminalEvent;

/// Read buffer size of the output pump
pub const READ_BUFFER_SIZE: usize = 4096;

/// How an output pump ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The remote side closed the channel
    RemoteClosed,
    /// The connection was shut down locally
    Cancelled,
    /// Reading from the channel failed
    ReadFailed(String),
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across two reads is held back until its
/// remaining bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
                        out.push_str(text);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// End of stream: a character that never completed becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }
}

/// Bridges connections to subscribers.
#[derive(Clone)]
pub struct TerminalBridge {
    sink: Arc<dyn EventSink>,
}

impl TerminalBridge {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Start the output pump of `connection`, delivering to `subscriber`.
    ///
    /// Fails with [`BridgeError::AlreadyStreaming`] if the connection already
    /// has a pump.
    pub async fn start_pump(
        &self,
        subscriber: String,
        connection: Arc<Connection>,
    ) -> Result<JoinHandle<PumpExit>, BridgeError> {
        let mut reader = connection
            .take_reader()
            .await
            .ok_or_else(|| BridgeError::AlreadyStreaming(connection.id().to_string()))?;

        let sink = self.sink.clone();
        let cancel_token = connection.cancel_token();

        info!(
            "Starting output pump for connection {} -> {}",
            connection.id(),
            subscriber
        );

        Ok(tokio::spawn(async move {
            let mut buffer = [0u8; READ_BUFFER_SIZE];
            let mut decoder = Utf8Decoder::default();

            let exit = loop {
                if !connection.is_open() {
                    break PumpExit::Cancelled;
                }

                let read = tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => break PumpExit::Cancelled,
                    read = reader.read(&mut buffer) => read,
                };

                match read {
                    Ok(0) => break PumpExit::RemoteClosed,
                    Ok(n) => {
                        let text = decoder.decode(&buffer[..n]);
                        if !text.is_empty() {
                            sink.deliver(&subscriber, TerminalEvent::output(connection.id(), text));
                        }
                    }
                    Err(e) => {
                        warn!("Output read interrupted for {}: {}", connection.id(), e);
                        break PumpExit::ReadFailed(e.to_string());
                    }
                }
            };

            let tail = decoder.finish();
            if !tail.is_empty() {
                sink.deliver(&subscriber, TerminalEvent::output(connection.id(), tail));
            }

            connection.mark_channel_closed();
            debug!("Output pump for {} stopped: {:?}", connection.id(), exit);
            exit
        }))
    }

    /// Write `data` to the connection's shell input.
    ///
    /// Input for a closed connection is dropped. Write failures are logged,
    /// not returned: terminal input is fire-and-forget.
    pub async fn forward_input(&self, connection: &Connection, data: &[u8]) {
        if !connection.is_open() {
            debug!(
                "Dropping {} bytes of input for closed connection {}",
                data.len(),
                connection.id()
            );
            return;
        }

        if let Err(e) = connection.writer().write(data).await {
            warn!("Failed to forward input to {}: {}", connection.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::delivery::BroadcastSink;
    use crate::bridge::factory::{HostTarget, SessionFactory};
    use crate::bridge::testing::MockFactory;
    use crate::bridge::types::{ConnectionInfo, ConnectionStatus, EventKind};
    use std::time::Duration;

    mod utf8_decoder {
        use super::*;

        #[test]
        fn test_ascii_passthrough() {
            let mut decoder = Utf8Decoder::default();
            assert_eq!(decoder.decode(b"ls -la\r\n"), "ls -la\r\n");
            assert_eq!(decoder.pending_len(), 0);
        }

        #[test]
        fn test_split_multibyte_character() {
            let bytes = "héllo".as_bytes();
            // 'é' is two bytes at offsets 1..3; split inside it
            let mut decoder = Utf8Decoder::default();
            assert_eq!(decoder.decode(&bytes[..2]), "h");
            assert_eq!(decoder.pending_len(), 1);
            assert_eq!(decoder.decode(&bytes[2..]), "éllo");
            assert_eq!(decoder.pending_len(), 0);
        }

        #[test]
        fn test_invalid_byte_replaced() {
            let mut decoder = Utf8Decoder::default();
            assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        }

        #[test]
        fn test_finish_replaces_unfinished_character() {
            let mut decoder = Utf8Decoder::default();
            assert_eq!(decoder.decode(b"ok\xE4"), "ok");
            assert_eq!(decoder.finish(), "\u{FFFD}");
            assert_eq!(decoder.pending_len(), 0);
            assert_eq!(decoder.finish(), "");
        }

        #[test]
        fn test_lone_incomplete_prefix_yields_empty() {
            let mut decoder = Utf8Decoder::default();
            assert_eq!(decoder.decode(&[0xE4]), "");
            assert_eq!(decoder.decode(&[0xB8, 0xAD]), "中");
        }
    }

    async fn open(factory: &MockFactory) -> Arc<Connection> {
        let target = HostTarget::new("h", 22, "u", "p");
        let parts = factory
            .open_interactive(&target, Duration::from_secs(1))
            .await
            .unwrap();
        Arc::new(Connection::new(ConnectionInfo::new("c1", &target, "alice"), parts))
    }

    mod pump {
        use super::*;

        #[tokio::test]
        async fn test_delivers_output_in_order() {
            let factory = MockFactory::new();
            let conn = open(&factory).await;
            let sink = Arc::new(BroadcastSink::new());
            let mut rx = sink.subscribe("alice");
            let bridge = TerminalBridge::new(sink.clone());

            let feed = factory.last_shell_feed().unwrap();
            let pump = bridge.start_pump("alice".into(), conn.clone()).await.unwrap();

            for line in ["one\r\n", "two\r\n", "three\r\n"] {
                feed.send(line.as_bytes().to_vec()).unwrap();
            }

            let mut received = String::new();
            while received.len() < "one\r\ntwo\r\nthree\r\n".len() {
                let event = rx.recv().await.unwrap();
                assert_eq!(event.kind, EventKind::Output);
                assert_eq!(event.connection_id.as_deref(), Some("c1"));
                received.push_str(&event.data);
            }
            assert_eq!(received, "one\r\ntwo\r\nthree\r\n");

            conn.shutdown().await;
            assert_eq!(pump.await.unwrap(), PumpExit::Cancelled);
        }

        #[tokio::test]
        async fn test_large_output_is_chunked() {
            let factory = MockFactory::new();
            let conn = open(&factory).await;
            let sink = Arc::new(BroadcastSink::new());
            let mut rx = sink.subscribe("alice");
            let bridge = TerminalBridge::new(sink.clone());
            let feed = factory.last_shell_feed().unwrap();
            let pump = bridge.start_pump("alice".into(), conn.clone()).await.unwrap();

            feed.send(vec![b'x'; READ_BUFFER_SIZE + 100]).unwrap();

            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.data.len(), READ_BUFFER_SIZE);
            assert_eq!(second.data.len(), 100);

            conn.shutdown().await;
            pump.await.unwrap();
        }

        #[tokio::test]
        async fn test_remote_close_stops_pump() {
            let factory = MockFactory::new();
            let conn = open(&factory).await;
            let bridge = TerminalBridge::new(Arc::new(BroadcastSink::new()));
            let pump = bridge.start_pump("alice".into(), conn.clone()).await.unwrap();

            factory.close_remote_shell();

            assert_eq!(pump.await.unwrap(), PumpExit::RemoteClosed);
            assert_eq!(conn.status(), ConnectionStatus::Closed);
            // The pump does not tear the session down
            assert_eq!(factory.sessions_disconnected(), 0);
        }

        #[tokio::test]
        async fn test_unfinished_character_flushed_on_close() {
            let factory = MockFactory::new();
            let conn = open(&factory).await;
            let sink = Arc::new(BroadcastSink::new());
            let mut rx = sink.subscribe("alice");
            let bridge = TerminalBridge::new(sink.clone());
            let feed = factory.last_shell_feed().unwrap();
            let pump = bridge.start_pump("alice".into(), conn.clone()).await.unwrap();

            feed.send(b"ok\xE4".to_vec()).unwrap();
            assert_eq!(rx.recv().await.unwrap().data, "ok");
            factory.close_remote_shell();

            assert_eq!(pump.await.unwrap(), PumpExit::RemoteClosed);
            assert_eq!(rx.recv().await.unwrap().data, "\u{FFFD}");
        }

        #[tokio::test]
        async fn test_shutdown_unblocks_pending_read() {
            let factory = MockFactory::new();
            let conn = open(&factory).await;
            let bridge = TerminalBridge::new(Arc::new(BroadcastSink::new()));
            let pump = bridge.start_pump("alice".into(), conn.clone()).await.unwrap();

            // No output is ever produced; only shutdown can end the read
            conn.shutdown().await;

            let exit = tokio::time::timeout(Duration::from_secs(2), pump)
                .await
                .expect("pump leaked after shutdown")
                .unwrap();
            assert_eq!(exit, PumpExit::Cancelled);
        }

        #[tokio::test]
        async fn test_read_error_stops_pump() {
            let factory = MockFactory::new();
            factory.fail_shell_reads();
            let conn = open(&factory).await;
            let bridge = TerminalBridge::new(Arc::new(BroadcastSink::new()));

            let pump = bridge.start_pump("alice".into(), conn.clone()).await.unwrap();

            assert!(matches!(pump.await.unwrap(), PumpExit::ReadFailed(_)));
        }

        #[tokio::test]
        async fn test_second_pump_rejected() {
            let factory = MockFactory::new();
            let conn = open(&factory).await;
            let bridge = TerminalBridge::new(Arc::new(BroadcastSink::new()));

            let _pump = bridge.start_pump("alice".into(), conn.clone()).await.unwrap();
            let second = bridge.start_pump("alice".into(), conn.clone()).await;

            assert!(matches!(second, Err(BridgeError::AlreadyStreaming(_))));
            conn.shutdown().await;
        }
    }

    mod input {
        use super::*;

        #[tokio::test]
        async fn test_forward_input_writes_bytes() {
            let factory = MockFactory::new();
            let conn = open(&factory).await;
            let bridge = TerminalBridge::new(Arc::new(BroadcastSink::new()));

            bridge.forward_input(&conn, b"uptime\n").await;

            assert_eq!(factory.written_input(), b"uptime\n".to_vec());
        }

        #[tokio::test]
        async fn test_forward_input_after_close_is_noop() {
            let factory = MockFactory::new();
            let conn = open(&factory).await;
            let bridge = TerminalBridge::new(Arc::new(BroadcastSink::new()));
            conn.shutdown().await;

            bridge.forward_input(&conn, b"ls\n").await;

            assert!(factory.written_input().is_empty());
        }

        #[tokio::test]
        async fn test_forward_input_write_error_is_swallowed() {
            let factory = MockFactory::new();
            factory.fail_shell_writes();
            let conn = open(&factory).await;
            let bridge = TerminalBridge::new(Arc::new(BroadcastSink::new()));

            bridge.forward_input(&conn, b"ls\n").await;

            assert!(conn.is_open());
        }
    }
}
