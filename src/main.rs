use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drivetime::clock::SystemClock;
use drivetime::config::Config;
use drivetime::platform::Platform;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    drivetime::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let cancel = CancellationToken::new();
    let (platform, receiver) = Platform::new(config.clone(), Arc::new(SystemClock), cancel.clone());
    let platform = Arc::new(platform);
    let reopened = platform.tenants.open_existing()?;
    let tasks = platform.start(receiver);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("drivetime listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  tenants reopened: {reopened}");
    info!("  hold ttl: {}s", config.hold_ttl_ms / 1000);
    info!("  auth: {}", if config.api_token.is_some() { "bearer token" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, drivetime::api::router(platform.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received, stopping background tasks");
    platform.shutdown();
    let drain = futures::future::join_all(tasks);
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        warn!("background tasks did not stop within 10s");
    }

    info!("drivetime stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("cannot listen for SIGTERM: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}
