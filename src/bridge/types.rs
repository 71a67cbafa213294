//! Serializable request, response and event types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::BridgeError;
use super::factory::HostTarget;

/// Connection metadata, safe to show to clients (no secret).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Key of the subscriber receiving this connection's output
    pub subscriber: String,
    /// RFC3339 timestamp
    pub connected_at: String,
}

impl ConnectionInfo {
    pub fn new(
        connection_id: impl Into<String>,
        target: &HostTarget,
        subscriber: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            host: target.host.clone(),
            port: target.port,
            username: target.username.clone(),
            subscriber: subscriber.into(),
            connected_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Open,
    Closed,
}

/// Kind of event delivered to a terminal subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connected,
    Output,
    Error,
    Disconnected,
}

/// One event on a subscriber's terminal stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub data: String,
}

impl TerminalEvent {
    pub fn new(kind: EventKind, connection_id: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            kind,
            connection_id: connection_id.map(str::to_string),
            data: data.into(),
        }
    }

    pub fn output(connection_id: &str, data: impl Into<String>) -> Self {
        Self::new(EventKind::Output, Some(connection_id), data)
    }
}

/// Envelope returned by every inbound operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error kind when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the data came from the metrics cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
            cached: None,
        }
    }

    pub fn failure(context: &str, err: &BridgeError) -> Self {
        Self {
            success: false,
            message: format!("{}: {}", context, err),
            data: None,
            error: Some(err.kind().to_string()),
            cached: None,
        }
    }

    /// Convert a result, using `message` on success and `context` as the
    /// failure message prefix.
    pub fn from_result(result: Result<T, BridgeError>, message: &str, context: &str) -> Self {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(e) => Self::failure(context, &e),
        }
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }
}

/// Request to open an interactive shell with explicit credentials.
#[derive(Clone, Deserialize)]
pub struct ConnectRequest {
    /// Key of the subscriber that will receive terminal output
    pub subscriber: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

pub(crate) fn default_ssh_port() -> u16 {
    22
}

impl ConnectRequest {
    pub fn target(&self) -> HostTarget {
        HostTarget::new(
            self.host.clone(),
            self.port,
            self.username.clone(),
            self.password.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub connection_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputRequest {
    pub data: String,
}

/// Failure marker for numeric diagnostics
pub const UNAVAILABLE: f64 = -1.0;

/// One diagnostic reading: a number, or a status word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Status(String),
}

impl MetricValue {
    /// The numeric value, unless missing or the failure marker.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) if *v != UNAVAILABLE => Some(*v),
            _ => None,
        }
    }
}

/// Immutable result of one diagnostic request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub values: BTreeMap<String, MetricValue>,
    /// RFC3339 timestamp
    pub collected_at: String,
}

impl DiagnosticResult {
    pub fn new(values: BTreeMap<String, MetricValue>) -> Self {
        Self {
            values,
            collected_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values.get(name)
    }

    /// Numeric reading by name; `None` when absent or unavailable.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(MetricValue::as_number)
    }

    /// Status reading by name.
    pub fn status(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(MetricValue::Status(status)) => Some(status),
            _ => None,
        }
    }

    /// True when no field holds a usable reading.
    pub fn all_unavailable(&self) -> bool {
        self.values.values().all(|value| match value {
            MetricValue::Number(_) => value.as_number().is_none(),
            MetricValue::Status(_) => false,
        })
    }
}

/// Normalised systemd unit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Active,
    Inactive,
    Unknown,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Active => "active",
            ServiceState::Inactive => "inactive",
            ServiceState::Unknown => "unknown",
        }
    }
}

/// One row of the container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    /// Short id (12 chars)
    pub id: String,
    pub name: String,
    pub status: String,
    pub ports: Vec<String>,
    pub image: String,
    pub is_running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerActionResult {
    pub success: bool,
    pub message: String,
    pub raw_output: String,
}
