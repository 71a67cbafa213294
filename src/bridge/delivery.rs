//! Terminal event delivery.
//!
//! The output pump only knows an [`EventSink`]: "deliver this event to the
//! subscriber with this key". [`BroadcastSink`] is the in-process
//! implementation used by the WebSocket endpoint: one `broadcast` channel per
//! subscriber key, created on first subscription.
//!
//! Events for a key with no live subscriber are dropped. Order is preserved
//! per sender, so output from one pump arrives in read order.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use super::types::TerminalEvent;

/// Capacity of each subscriber's event buffer
pub const SUBSCRIBER_BUFFER: usize = 1024;

/// Destination for terminal events.
pub trait EventSink: Send + Sync {
    fn deliver(&self, subscriber: &str, event: TerminalEvent);
}

/// Per-subscriber broadcast fan-out.
#[derive(Debug, Default)]
pub struct BroadcastSink {
    channels: DashMap<String, broadcast::Sender<TerminalEvent>>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the events of `subscriber`.
    pub fn subscribe(&self, subscriber: &str) -> broadcast::Receiver<TerminalEvent> {
        self.channels
            .entry(subscriber.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_BUFFER).0)
            .subscribe()
    }

    /// Drop the channel of a subscriber once nobody listens any more.
    pub fn prune(&self, subscriber: &str) {
        self.channels
            .remove_if(subscriber, |_, sender| sender.receiver_count() == 0);
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels.len()
    }
}

impl EventSink for BroadcastSink {
    fn deliver(&self, subscriber: &str, event: TerminalEvent) {
        let delivered = self
            .channels
            .get(subscriber)
            .map(|sender| sender.send(event).is_ok())
            .unwrap_or(false);

        if !delivered {
            trace!("No live subscriber {}, event dropped", subscriber);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::types::EventKind;

    #[tokio::test]
    async fn test_delivers_to_subscriber_in_order() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe("alice");

        for i in 0..5 {
            sink.deliver("alice", TerminalEvent::output("c1", format!("chunk-{}", i)));
        }

        for i in 0..5 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.data, format!("chunk-{}", i));
            assert_eq!(event.kind, EventKind::Output);
        }
    }

    #[tokio::test]
    async fn test_subscribers_are_isolated() {
        let sink = BroadcastSink::new();
        let mut alice = sink.subscribe("alice");
        let mut bob = sink.subscribe("bob");

        sink.deliver("alice", TerminalEvent::output("c1", "for alice"));

        assert_eq!(alice.recv().await.unwrap().data, "for alice");
        assert!(bob.try_recv().is_err());
    }

    #[test]
    fn test_unknown_subscriber_is_dropped() {
        let sink = BroadcastSink::new();
        sink.deliver("nobody", TerminalEvent::output("c1", "lost"));
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[test]
    fn test_prune_only_without_receivers() {
        let sink = BroadcastSink::new();
        let rx = sink.subscribe("alice");

        sink.prune("alice");
        assert_eq!(sink.subscriber_count(), 1);

        drop(rx);
        sink.prune("alice");
        assert_eq!(sink.subscriber_count(), 0);
    }
}
