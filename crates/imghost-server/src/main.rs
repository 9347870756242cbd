//! imghost server - Main entry point

use anyhow::Result;
use imghost_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use imghost_server::{
    api::{self, AppState},
    cache::CacheService,
    config::Config,
    queue::DeletionConsumer,
};

/// How often expired cache rows are swept
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("imghost-server")
        .filter_directives("imghost_server=debug,tower_http=debug,axum=info,sqlx=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;

    init_logging(&log_config)?;

    info!("Starting imghost server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let state = AppState::from_config(&config).await?;

    // Background workers share one cancellation token
    let shutdown = CancellationToken::new();

    let consumer = DeletionConsumer::new(
        state.features.queue.clone(),
        state.features.blobs.clone(),
        &config.queue,
    );
    let consumer_shutdown = shutdown.clone();
    let consumer_handle = tokio::spawn(async move { consumer.run(consumer_shutdown).await });

    let purge_handle = tokio::spawn(purge_cache(state.features.cache.clone(), shutdown.clone()));

    let app = api::create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    shutdown.cancel();
    let (consumer_result, purge_result) = tokio::join!(consumer_handle, purge_handle);
    if let Err(e) = consumer_result {
        tracing::error!("Deletion consumer task failed: {}", e);
    }
    if let Err(e) = purge_result {
        tracing::error!("Cache purge task failed: {}", e);
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Periodically drop expired cache entries until cancelled
async fn purge_cache(cache: CacheService, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => cache.purge_expired().await,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
