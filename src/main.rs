use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vcs_review::{routes, BackendKind, ReviewBridge, ServiceConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env().context("Invalid service configuration")?;
    let bridge = ReviewBridge::from_config(&config).context("Failed to set up review bridge")?;

    tracing::info!(
        "History throttle window {}ms, VCS timeout {}s, AI model {}",
        config.history_throttle.as_millis(),
        config.vcs_timeout.as_secs(),
        config.ai_model
    );

    for backend in [BackendKind::Git, BackendKind::Svn] {
        let status = bridge.tool_status(backend).await;
        if status.is_available() {
            tracing::info!("{} backend ready: {:?}", backend, status);
        } else {
            tracing::warn!("{} backend not ready: {:?}", backend, status);
        }
    }

    let app = routes::router(Arc::new(bridge));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!("Review service listening on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
