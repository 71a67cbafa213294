//! HTTP and WebSocket endpoints.
//!
//! Every endpoint answers `200 OK` with an [`ApiResponse`] envelope; failures
//! are reported through its `success` and `error` fields. Terminal output is
//! pushed over `GET /api/ssh/events/:subscriber` as JSON text frames.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use poem::web::websocket::{Message, WebSocket};
use poem::web::{Data, Json, Path, Query};
use poem::{Endpoint, EndpointExt, IntoResponse, Route, delete, get, handler, post};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::service::BridgeService;
use super::types::{ConnectRequest, EventKind, InputRequest, TerminalEvent};

#[derive(Debug, Deserialize)]
struct HostConnectRequest {
    subscriber: String,
}

#[derive(Debug, Deserialize)]
struct ServicesQuery {
    /// Comma-separated service names
    names: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    lines: Option<u32>,
}

#[handler]
async fn connect(
    Data(service): Data<&Arc<BridgeService>>,
    Json(request): Json<ConnectRequest>,
) -> impl IntoResponse {
    Json(service.connect(request).await)
}

#[handler]
async fn connect_host(
    Data(service): Data<&Arc<BridgeService>>,
    Path(host_id): Path<String>,
    Json(request): Json<HostConnectRequest>,
) -> impl IntoResponse {
    Json(service.connect_host(&host_id, &request.subscriber).await)
}

#[handler]
async fn send_input(
    Data(service): Data<&Arc<BridgeService>>,
    Path(connection_id): Path<String>,
    Json(request): Json<InputRequest>,
) -> impl IntoResponse {
    Json(service.send_input(&connection_id, &request.data).await)
}

#[handler]
async fn disconnect(
    Data(service): Data<&Arc<BridgeService>>,
    Path(connection_id): Path<String>,
) -> impl IntoResponse {
    Json(service.disconnect(&connection_id).await)
}

#[handler]
fn list_connections(Data(service): Data<&Arc<BridgeService>>) -> impl IntoResponse {
    Json(service.list_connections())
}

/// Error event telling a slow subscriber that part of its output is gone.
fn lag_notice(skipped: u64) -> TerminalEvent {
    TerminalEvent::new(
        EventKind::Error,
        None,
        format!("{} terminal events skipped, output is incomplete", skipped),
    )
}

/// Stream the subscriber's terminal events until either side goes away.
#[handler]
fn events(
    Path(subscriber): Path<String>,
    ws: WebSocket,
    Data(service): Data<&Arc<BridgeService>>,
) -> impl IntoResponse {
    let service = service.clone();
    let mut rx = service.subscribe(&subscriber);

    ws.on_upgrade(move |socket| async move {
        info!("Event stream opened for {}", subscriber);
        let (mut sink, mut stream) = socket.split();

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Subscriber {} lagged, {} events dropped", subscriber, skipped);
                            lag_notice(skipped)
                        }
                        Err(RecvError::Closed) => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode terminal event: {}", e);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        drop(rx);
        service.unsubscribe(&subscriber);
        debug!("Event stream closed for {}", subscriber);
    })
}

#[handler]
async fn metrics(
    Data(service): Data<&Arc<BridgeService>>,
    Path(host_id): Path<String>,
) -> impl IntoResponse {
    Json(service.get_metrics(&host_id).await)
}

#[handler]
async fn system_info(
    Data(service): Data<&Arc<BridgeService>>,
    Path(host_id): Path<String>,
) -> impl IntoResponse {
    Json(service.get_system_info(&host_id).await)
}

#[handler]
async fn services(
    Data(service): Data<&Arc<BridgeService>>,
    Path(host_id): Path<String>,
    Query(query): Query<ServicesQuery>,
) -> impl IntoResponse {
    let names: Vec<String> = query
        .names
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    Json(service.get_service_status(&host_id, &names).await)
}

#[handler]
async fn containers(
    Data(service): Data<&Arc<BridgeService>>,
    Path(host_id): Path<String>,
) -> impl IntoResponse {
    Json(service.list_containers(&host_id).await)
}

#[handler]
async fn container_action(
    Data(service): Data<&Arc<BridgeService>>,
    Path((host_id, container_id, action)): Path<(String, String, String)>,
) -> impl IntoResponse {
    Json(
        service
            .container_action(&host_id, &container_id, &action)
            .await,
    )
}

#[handler]
async fn container_logs(
    Data(service): Data<&Arc<BridgeService>>,
    Path((host_id, container_id)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    Json(
        service
            .container_logs(&host_id, &container_id, query.lines)
            .await,
    )
}

#[handler]
async fn container_inspect(
    Data(service): Data<&Arc<BridgeService>>,
    Path((host_id, container_id)): Path<(String, String)>,
) -> impl IntoResponse {
    Json(service.container_inspect(&host_id, &container_id).await)
}

/// Build the application routes around `service`.
pub fn app(service: Arc<BridgeService>) -> impl Endpoint {
    Route::new()
        .at("/api/ssh/connect", post(connect))
        .at("/api/ssh/connect/:host_id", post(connect_host))
        .at("/api/ssh/connections", get(list_connections))
        .at("/api/ssh/events/:subscriber", get(events))
        .at("/api/ssh/:connection_id", delete(disconnect))
        .at("/api/ssh/:connection_id/input", post(send_input))
        .at("/api/dashboard/server/:host_id/metrics", get(metrics))
        .at("/api/dashboard/server/:host_id/system", get(system_info))
        .at("/api/dashboard/server/:host_id/services", get(services))
        .at("/api/dashboard/server/:host_id/docker/containers", get(containers))
        .at(
            "/api/dashboard/server/:host_id/docker/container/:container_id/logs",
            get(container_logs),
        )
        .at(
            "/api/dashboard/server/:host_id/docker/container/:container_id/inspect",
            get(container_inspect),
        )
        .at(
            "/api/dashboard/server/:host_id/docker/container/:container_id/:action",
            post(container_action),
        )
        .data(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::config::BridgeConfig;
    use crate::bridge::credentials::InMemoryCredentials;
    use crate::bridge::testing::MockFactory;
    use poem::test::TestClient;
    use serde_json::json;

    fn client(factory: &MockFactory) -> TestClient<impl Endpoint> {
        let credentials = InMemoryCredentials::from_json_str(
            r#"[{"id": "web-1", "host": "10.0.0.1", "username": "ops", "password": "pw"}]"#,
        )
        .unwrap();
        let service = BridgeService::new(
            &BridgeConfig::default(),
            Arc::new(factory.clone()),
            Arc::new(credentials),
        );
        TestClient::new(app(Arc::new(service)))
    }

    #[tokio::test]
    async fn test_connect_list_disconnect() {
        let factory = MockFactory::new();
        let cli = client(&factory);

        let resp = cli
            .post("/api/ssh/connect")
            .body_json(&json!({
                "subscriber": "alice",
                "host": "10.0.0.9",
                "username": "ops",
                "password": "pw"
            }))
            .send()
            .await;
        resp.assert_status_is_ok();
        let body = resp.json().await;
        body.value().object().get("success").assert_bool(true);
        let id = body
            .value()
            .object()
            .get("data")
            .object()
            .get("connection_id")
            .string()
            .to_string();

        let resp = cli.get("/api/ssh/connections").send().await;
        resp.assert_status_is_ok();
        resp.json()
            .await
            .value()
            .object()
            .get("data")
            .array()
            .assert_len(1);

        let resp = cli.delete(format!("/api/ssh/{}", id)).send().await;
        resp.assert_status_is_ok();
        assert_eq!(factory.sessions_disconnected(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_container_action() {
        let factory = MockFactory::new();
        let cli = client(&factory);

        let resp = cli
            .post("/api/dashboard/server/web-1/docker/container/abc123/pause")
            .send()
            .await;

        resp.assert_status_is_ok();
        let body = resp.json().await;
        body.value().object().get("success").assert_bool(false);
        body.value().object().get("error").assert_string("rejected");
        assert_eq!(factory.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_services_query() {
        let factory = MockFactory::new();
        factory.script_exec("is-active nginx", "active");
        let cli = client(&factory);

        let resp = cli
            .get("/api/dashboard/server/web-1/services")
            .query("names", &"nginx")
            .send()
            .await;

        resp.assert_status_is_ok();
        resp.json()
            .await
            .value()
            .object()
            .get("data")
            .object()
            .get("values")
            .object()
            .get("nginx")
            .assert_string("active");
    }

    #[test]
    fn test_lag_notice() {
        let notice = lag_notice(42);

        assert_eq!(notice.kind, EventKind::Error);
        assert_eq!(notice.connection_id, None);
        assert!(notice.data.starts_with("42 terminal events skipped"));
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["type"], "error");
    }

    #[tokio::test]
    async fn test_logs_lines_query() {
        let factory = MockFactory::new();
        let cli = client(&factory);

        cli.get("/api/dashboard/server/web-1/docker/container/abc123/logs")
            .query("lines", &20)
            .send()
            .await
            .assert_status_is_ok();

        assert_eq!(
            factory.exec_log(),
            vec!["docker logs --tail 20 abc123 2>&1".to_string()]
        );
    }
}
