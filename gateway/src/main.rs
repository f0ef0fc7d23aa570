//! COSV Horizon 身份网关

mod middleware;
mod routes;
mod state;

use horizon_bootstrap::{Infrastructure, ShutdownController, init_runtime};
use horizon_config::AppConfig;
use horizon_telemetry::init_metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 本地开发时从 .env 读取 HORIZON_* 变量
    dotenvy::dotenv().ok();

    let config_dir = std::env::var("APP_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = AppConfig::load(&config_dir)?;
    init_runtime(&config);

    let metrics = init_metrics()?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let infra = Arc::new(Infrastructure::from_config(config).await?);
    let app = routes::router(AppState::from_infrastructure(infra, metrics))
        .layer(TraceLayer::new_for_http());

    let shutdown = ShutdownController::new();
    shutdown.listen_for_os_signals();

    info!(%addr, "Starting gateway");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.wait())
    .await?;

    info!("Gateway stopped");
    Ok(())
}
