use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use pharmacy_dispatch::api::rest::router;
use pharmacy_dispatch::config::{Config, LogFormat};
use pharmacy_dispatch::engine::scheduler::run_scheduler;
use pharmacy_dispatch::error::AppError;
use pharmacy_dispatch::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let http_port = config.http_port;
    let tick = Duration::from_millis(config.scheduler_tick_ms);
    let shared_state = Arc::new(AppState::new(config));

    let app = router(shared_state.clone());

    let scheduler = tokio::spawn(run_scheduler(shared_state.clone(), tick));

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::UpstreamFailure(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    let signal_state = shared_state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_state.shutdown();
        })
        .await
        .map_err(|err| AppError::UpstreamFailure(format!("server error: {err}")))?;

    shared_state.shutdown();
    if let Err(err) = scheduler.await {
        tracing::error!(error = %err, "scheduler task panicked");
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
