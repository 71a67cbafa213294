//! Inbound facade.
//!
//! Wires the registry, terminal bridge, diagnostics and cache together and
//! converts every result into an [`ApiResponse`]. Nothing below this layer
//! panics past it or returns a bare error to the transport.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::MetricsCache;
use super::config::BridgeConfig;
use super::credentials::CredentialSource;
use super::delivery::{BroadcastSink, EventSink};
use super::diagnostics::{DEFAULT_LOG_LINES, DiagnosticExecutor};
use super::error::BridgeError;
use super::factory::{HostTarget, SessionFactory};
use super::registry::ConnectionRegistry;
use super::terminal::{PumpExit, TerminalBridge};
use super::types::{
    ApiResponse, ConnectRequest, ConnectResponse, ConnectionInfo, ContainerActionResult,
    ContainerSummary, DiagnosticResult, EventKind, TerminalEvent,
};

pub struct BridgeService {
    registry: Arc<ConnectionRegistry>,
    bridge: TerminalBridge,
    events: Arc<BroadcastSink>,
    credentials: Arc<dyn CredentialSource>,
    diagnostics: DiagnosticExecutor,
    cache: MetricsCache,
}

impl BridgeService {
    pub fn new(
        config: &BridgeConfig,
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let events = Arc::new(BroadcastSink::new());
        Self {
            registry: Arc::new(ConnectionRegistry::new(
                factory.clone(),
                config.connect_timeout,
            )),
            bridge: TerminalBridge::new(events.clone()),
            events,
            credentials: credentials.clone(),
            diagnostics: DiagnosticExecutor::new(
                factory,
                credentials,
                config.diagnostic_timeout,
                config.command_timeout,
            ),
            cache: MetricsCache::new(config.cache_ttl),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    // ---- Terminal ----

    /// Open an interactive shell with explicit credentials.
    pub async fn connect(&self, request: ConnectRequest) -> ApiResponse<ConnectResponse> {
        let target = request.target();
        let result = self.open_terminal(&target, &request.subscriber).await;
        ApiResponse::from_result(result, "Connected", "Connection failed")
    }

    /// Open an interactive shell on a configured host.
    pub async fn connect_host(&self, host_id: &str, subscriber: &str) -> ApiResponse<ConnectResponse> {
        let result = match self.credentials.lookup(host_id).await {
            Ok(target) => self.open_terminal(&target, subscriber).await,
            Err(e) => Err(e),
        };
        ApiResponse::from_result(result, "Connected", "Connection failed")
    }

    async fn open_terminal(
        &self,
        target: &HostTarget,
        subscriber: &str,
    ) -> Result<ConnectResponse, BridgeError> {
        let connection_id = match self.registry.create(target, subscriber).await {
            Ok(id) => id,
            Err(e) => {
                self.events.deliver(
                    subscriber,
                    TerminalEvent::new(EventKind::Error, None, format!("Connection failed: {}", e)),
                );
                return Err(e);
            }
        };

        let connection = self.registry.get(&connection_id)?;
        self.events.deliver(
            subscriber,
            TerminalEvent::new(
                EventKind::Connected,
                Some(&connection_id),
                format!("Connected to {}", target.display_name()),
            ),
        );

        match self
            .bridge
            .start_pump(subscriber.to_string(), connection)
            .await
        {
            Ok(pump) => self.watch_pump(connection_id.clone(), subscriber.to_string(), pump),
            Err(e) => {
                self.registry.close(&connection_id).await;
                return Err(e);
            }
        }

        Ok(ConnectResponse { connection_id })
    }

    /// Once the pump ends, report it to the subscriber and drop the connection.
    fn watch_pump(&self, connection_id: String, subscriber: String, pump: JoinHandle<PumpExit>) {
        let registry = self.registry.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let event = match pump.await {
                Ok(PumpExit::ReadFailed(reason)) => {
                    TerminalEvent::new(EventKind::Error, Some(&connection_id), reason)
                }
                Ok(exit) => {
                    debug!("Pump for {} ended: {:?}", connection_id, exit);
                    TerminalEvent::new(
                        EventKind::Disconnected,
                        Some(&connection_id),
                        "Connection closed",
                    )
                }
                Err(e) => TerminalEvent::new(
                    EventKind::Error,
                    Some(&connection_id),
                    format!("Output pump aborted: {}", e),
                ),
            };

            events.deliver(&subscriber, event);
            registry.close(&connection_id).await;
        });
    }

    /// Forward input. Input for an unknown or closed connection is dropped.
    pub async fn send_input(&self, connection_id: &str, data: &str) -> ApiResponse<()> {
        match self.registry.get(connection_id) {
            Ok(connection) => {
                self.bridge.forward_input(&connection, data.as_bytes()).await;
                ApiResponse::ok("Input sent", ())
            }
            Err(_) => {
                debug!("Dropping input for unknown connection {}", connection_id);
                ApiResponse::ok("Input dropped: connection not open", ())
            }
        }
    }

    /// Close a connection. Unknown ids succeed.
    pub async fn disconnect(&self, connection_id: &str) -> ApiResponse<()> {
        self.registry.close(connection_id).await;
        ApiResponse::ok("Disconnected", ())
    }

    pub fn list_connections(&self) -> ApiResponse<Vec<ConnectionInfo>> {
        ApiResponse::ok("Connections", self.registry.list())
    }

    /// Receive terminal events addressed to `subscriber`.
    pub fn subscribe(&self, subscriber: &str) -> broadcast::Receiver<TerminalEvent> {
        self.events.subscribe(subscriber)
    }

    /// Release the event channel of a subscriber that went away.
    pub fn unsubscribe(&self, subscriber: &str) {
        self.events.prune(subscriber);
    }

    /// Close every connection.
    pub async fn shutdown(&self) {
        info!("Closing {} open connections", self.registry.len());
        self.registry.close_all().await;
    }

    // ---- Dashboard ----

    /// Metrics, served from the cache while fresh.
    pub async fn get_metrics(&self, host_id: &str) -> ApiResponse<DiagnosticResult> {
        if let Some(cached) = self.cache.get(host_id) {
            return ApiResponse::ok("Metrics", cached).with_cached(true);
        }

        match self.diagnostics.collect_metrics(host_id).await {
            Ok(result) => {
                // A result with no usable reading would pin an outage for a full TTL
                if result.all_unavailable() {
                    warn!("No metric readable on {}, result not cached", host_id);
                } else {
                    self.cache.put(host_id, result.clone());
                }
                ApiResponse::ok("Metrics", result).with_cached(false)
            }
            Err(e) => {
                warn!("Failed to collect metrics for {}: {}", host_id, e);
                ApiResponse::failure("Failed to collect metrics", &e)
            }
        }
    }

    pub async fn get_system_info(&self, host_id: &str) -> ApiResponse<DiagnosticResult> {
        ApiResponse::from_result(
            self.diagnostics.collect_system_info(host_id).await,
            "System info",
            "Failed to collect system info",
        )
    }

    pub async fn get_service_status(
        &self,
        host_id: &str,
        services: &[String],
    ) -> ApiResponse<DiagnosticResult> {
        ApiResponse::from_result(
            self.diagnostics.service_status(host_id, services).await,
            "Service status",
            "Failed to check services",
        )
    }

    pub async fn list_containers(&self, host_id: &str) -> ApiResponse<Vec<ContainerSummary>> {
        ApiResponse::from_result(
            self.diagnostics.list_containers(host_id).await,
            "Containers",
            "Failed to list containers",
        )
    }

    /// The envelope's success flag follows the observed outcome of the action.
    pub async fn container_action(
        &self,
        host_id: &str,
        container_id: &str,
        action: &str,
    ) -> ApiResponse<ContainerActionResult> {
        match self
            .diagnostics
            .container_action(host_id, container_id, action)
            .await
        {
            Ok(result) => {
                let mut response = ApiResponse::ok(result.message.clone(), result);
                response.success = response.data.as_ref().is_some_and(|r| r.success);
                response
            }
            Err(e) => ApiResponse::failure(&format!("Container {} failed", action), &e),
        }
    }

    pub async fn container_logs(
        &self,
        host_id: &str,
        container_id: &str,
        lines: Option<u32>,
    ) -> ApiResponse<String> {
        let lines = lines.unwrap_or(DEFAULT_LOG_LINES);
        ApiResponse::from_result(
            self.diagnostics
                .container_logs(host_id, container_id, lines)
                .await,
            "Container logs",
            "Failed to fetch container logs",
        )
    }

    pub async fn container_inspect(&self, host_id: &str, container_id: &str) -> ApiResponse<String> {
        ApiResponse::from_result(
            self.diagnostics.container_inspect(host_id, container_id).await,
            "Container details",
            "Failed to inspect container",
        )
    }
}
