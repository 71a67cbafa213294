#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem::{EndpointExt, Server, listener::TcpListener, middleware::Tracing};
use tracing::{info, warn};
use webssh_bridge::bridge::BridgeService;
use webssh_bridge::bridge::client::SshSessionFactory;
use webssh_bridge::bridge::config::BridgeConfig;
use webssh_bridge::bridge::credentials::InMemoryCredentials;
use webssh_bridge::bridge::routes;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let config = BridgeConfig::from_env();

    let credentials = match &config.servers_file {
        Some(path) => InMemoryCredentials::from_json_file(path)?,
        None => {
            warn!("SERVERS_FILE not set, dashboard and host-id connects have no servers");
            InMemoryCredentials::new()
        }
    };

    let service = Arc::new(BridgeService::new(
        &config,
        Arc::new(SshSessionFactory::new()),
        Arc::new(credentials),
    ));

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Starting web terminal bridge on {}", addr);
    info!(
        "Connect timeout {}s, diagnostic timeout {}s, metrics cache TTL {}s",
        config.connect_timeout.as_secs(),
        config.diagnostic_timeout.as_secs(),
        config.cache_ttl.as_secs()
    );

    let app = routes::app(service.clone()).with(Tracing);

    Server::new(TcpListener::bind(addr))
        .name("webssh-bridge")
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            None,
        )
        .await?;

    service.shutdown().await;
    Ok(())
}
