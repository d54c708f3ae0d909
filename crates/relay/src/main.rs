use std::sync::Arc;

use anyhow::Context;
use picedit_relay::{
    auth::jwt::JwtAccessTokenService,
    config::{LogFormat, RelayConfig},
    directory::PictureDirectory,
    EditRelay,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    config.events.validate().context("invalid edit event pipeline configuration")?;
    if config.is_dev_jwt_secret() {
        warn!("PICEDIT_RELAY_JWT_SECRET is not set; using the development-only secret");
    }
    let jwt_service =
        Arc::new(JwtAccessTokenService::new(&config.jwt_secret).context("invalid relay JWT secret")?);

    let directory = match config.database_url.as_deref() {
        Some(database_url) => PictureDirectory::connect(database_url, &config.pool)
            .await
            .context("failed to open picture directory")?,
        None => {
            warn!("PICEDIT_RELAY_DATABASE_URL is not set; using an empty in-memory picture directory");
            PictureDirectory::in_memory()
        }
    };

    let relay = EditRelay::start(config.events, directory, jwt_service)
        .context("failed to start edit event dispatcher")?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        event_workers = config.events.workers,
        event_buffer_capacity = config.events.capacity,
        "starting picture edit relay"
    );

    let served = axum::serve(listener, relay.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly");

    relay.shutdown().await;
    served
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
