//! SyncBoard server entry point

use anyhow::{Context, Result};
use tokio::signal;
use tracing_subscriber::EnvFilter;

use syncboard_server::{
    config::{Config, LogFormat},
    routes::create_router,
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(config.log_format);

    tracing::info!(
        bind_address = %config.bind_address,
        move_jitter_max_ms = config.move_jitter_max_ms,
        heartbeat_interval_secs = config.heartbeat_interval_secs,
        "Starting SyncBoard server"
    );

    run(config).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run(config: Config) -> Result<()> {
    let state = AppState::new(config.clone());

    let stats_reporter = config
        .stats_interval()
        .map(|every| state.ws_state.spawn_stats_reporter(every));

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    tracing::info!("SyncBoard listening on {}", config.bind_address);

    let ws_state = state.ws_state.clone();
    let announcer = ws_state.clone();
    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            announcer.announce_shutdown().await;
        })
        .await
        .context("server shutdown with error")?;

    if let Some(handle) = stats_reporter {
        handle.abort();
    }

    // Upgraded sockets outlive `serve`; wait for sessions to deregister
    let grace = config.shutdown_grace();
    tracing::info!(grace_seconds = grace.as_secs(), "Waiting for connections to close");
    if tokio::time::timeout(grace, ws_state.wait_until_drained()).await.is_err() {
        tracing::warn!(
            remaining = ws_state.connection_count().await,
            "Connections still open after grace period; forcing exit"
        );
        std::process::exit(1);
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
