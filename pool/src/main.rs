//! Entry point: loads configuration, wires the session/job/auth/share
//! fabric together, and runs the Stratum listener and metrics endpoint
//! until a shutdown signal arrives.
//!
//! Exit codes: `0` clean shutdown, `1` configuration error, `2` the
//! listener failed to bind, `3` shutdown did not drain within its grace
//! period.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stratum_core::Algorithm;
use stratum_pool::auth::{Authenticator, InMemoryAuthStore};
use stratum_pool::config::Config;
use stratum_pool::jobs::JobDistributor;
use stratum_pool::metrics;
use stratum_pool::session::SessionManager;
use stratum_pool::shares::ShareValidator;
use stratum_pool::sink::{spawn_sink_worker, LoggingShareSink};
use stratum_pool::stratum::StratumServer;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(run())
}

async fn run() -> ExitCode {
    let config = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            error!(error = %err, "invalid configuration, refusing to start");
            return ExitCode::from(1);
        }
    };

    let algorithm = Algorithm::from_str(&config.algorithm).unwrap_or_default();

    let session_manager = Arc::new(SessionManager::new(config.extranonce1_size));
    let job_distributor = Arc::new(JobDistributor::new());
    let authenticator = Arc::new(Authenticator::new(InMemoryAuthStore::new()));
    let share_validator = Arc::new(ShareValidator::new(algorithm));

    let (share_tx, share_rx) = mpsc::unbounded_channel();
    let sink_handle = spawn_sink_worker(LoggingShareSink, share_rx);

    let server = StratumServer::new(
        Arc::clone(&config),
        Arc::clone(&session_manager),
        Arc::clone(&job_distributor),
        Arc::clone(&authenticator),
        Arc::clone(&share_validator),
        share_tx.clone(),
    );

    let shutdown = CancellationToken::new();
    let metrics_task = tokio::spawn(serve_metrics(config.metrics_listen.clone(), shutdown.clone()));

    let listen_result = tokio::select! {
        result = server.serve(shutdown.clone()) => Some(result),
        _ = wait_for_signal() => {
            info!("shutdown signal received");
            None
        }
    };

    shutdown.cancel();
    server.router().close();
    drop(share_tx);

    if let Some(Err(err)) = listen_result {
        error!(error = %err, "stratum listener failed to bind");
        return ExitCode::from(2);
    }

    let connections_drained = server.drain(SHUTDOWN_DRAIN).await;
    let aux_drained = tokio::time::timeout(SHUTDOWN_DRAIN, async {
        let _ = metrics_task.await;
        let _ = sink_handle.await;
    })
    .await
    .is_ok();

    if !connections_drained || !aux_drained {
        error!("shutdown did not drain within the grace period");
        return ExitCode::from(3);
    }

    info!("shutdown complete");
    ExitCode::from(0)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn serve_metrics(listen: String, shutdown: CancellationToken) {
    use axum::routing::get;
    use axum::Router;

    let app = Router::new().route("/metrics", get(|| async { metrics::render() }));

    let listener = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, listen = %listen, "failed to bind metrics listener");
            return;
        }
    };

    info!(listen = %listen, "metrics endpoint listening");
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        error!(error = %err, "metrics server exited with an error");
    }
}
