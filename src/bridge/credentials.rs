//! Host credential lookup.
//!
//! Diagnostics and host-id connects never carry secrets in the request; they
//! resolve a host id through a [`CredentialSource`].

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::info;

use super::error::BridgeError;
use super::factory::HostTarget;
use super::types::default_ssh_port;

/// Resolves a host id to connection credentials.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn lookup(&self, host_id: &str) -> Result<HostTarget, BridgeError>;
}

/// One configured server.
#[derive(Clone, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ServerRecord {
    pub fn target(&self) -> HostTarget {
        HostTarget::new(
            self.host.clone(),
            self.port,
            self.username.clone(),
            self.password.clone(),
        )
    }
}

impl fmt::Debug for ServerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Process-memory credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    servers: DashMap<String, ServerRecord>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = ServerRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Parse a JSON array of server records.
    pub fn from_json_str(json: &str) -> Result<Self, BridgeError> {
        let records: Vec<ServerRecord> = serde_json::from_str(json)
            .map_err(|e| BridgeError::Parse(format!("invalid servers file: {}", e)))?;
        Ok(Self::from_records(records))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, BridgeError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::NotFound(format!("servers file {}: {}", path.display(), e))
        })?;
        let store = Self::from_json_str(&json)?;
        info!("Loaded {} servers from {}", store.len(), path.display());
        Ok(store)
    }

    /// Add or replace a record.
    pub fn insert(&self, record: ServerRecord) {
        self.servers.insert(record.id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[async_trait]
impl CredentialSource for InMemoryCredentials {
    async fn lookup(&self, host_id: &str) -> Result<HostTarget, BridgeError> {
        self.servers
            .get(host_id)
            .map(|record| record.target())
            .ok_or_else(|| BridgeError::NotFound(format!("server {}", host_id)))
    }
}
