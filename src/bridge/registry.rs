//! Registry of live interactive connections.
//!
//! Backed by a `DashMap`, so operations on different connection ids never
//! serialize on a global lock. Ids are random v4 UUIDs (122 random bits),
//! generated per `create`, so concurrent creates cannot collide.
//!
//! A connection that fails to authenticate or open its shell is never
//! registered. Removal from the map is atomic, which makes [`close`] run
//! teardown exactly once per id no matter how many callers race on it.
//!
//! [`close`]: ConnectionRegistry::close

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::connection::Connection;
use super::error::BridgeError;
use super::factory::{HostTarget, SessionFactory};
use super::types::ConnectionInfo;

/// Owns every live [`Connection`], keyed by connection id.
pub struct ConnectionRegistry {
    factory: Arc<dyn SessionFactory>,
    connect_timeout: Duration,
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>, connect_timeout: Duration) -> Self {
        Self {
            factory,
            connect_timeout,
            connections: DashMap::new(),
        }
    }

    /// Open a session and shell for `target` and register it.
    ///
    /// Returns the new connection id.
    pub async fn create(
        &self,
        target: &HostTarget,
        subscriber: &str,
    ) -> Result<String, BridgeError> {
        info!(
            "Opening interactive connection to {} with timeout {}s",
            target.display_name(),
            self.connect_timeout.as_secs()
        );

        let parts = self
            .factory
            .open_interactive(target, self.connect_timeout)
            .await
            .map_err(|e| {
                error!("Connection to {} failed: {}", target.display_name(), e);
                e
            })?;

        let connection_id = Uuid::new_v4().to_string();
        let info = ConnectionInfo::new(connection_id.clone(), target, subscriber);

        self.connections
            .insert(connection_id.clone(), Arc::new(Connection::new(info, parts)));

        info!(
            "Connection {} registered for {}",
            connection_id,
            target.display_name()
        );
        Ok(connection_id)
    }

    /// Look up a live connection.
    pub fn get(&self, connection_id: &str) -> Result<Arc<Connection>, BridgeError> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BridgeError::NotFound(format!("connection {}", connection_id)))
    }

    /// Remove and tear down a connection. Unknown or already-closed ids are a
    /// no-op. Teardown errors are logged, never returned.
    pub async fn close(&self, connection_id: &str) {
        match self.connections.remove(connection_id) {
            Some((_, connection)) => connection.shutdown().await,
            None => debug!("Close requested for unknown connection {}", connection_id),
        }
    }

    pub fn is_open(&self, connection_id: &str) -> bool {
        self.get(connection_id)
            .map(|connection| connection.is_open())
            .unwrap_or(false)
    }

    /// Metadata of all registered connections.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| entry.value().info().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Tear down every connection, e.g. on process shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for id in ids {
            self.close(&id).await;
        }
    }
}
