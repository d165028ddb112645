//! sandbox-runner service entry point.
//!
//! Boot sequence: load configuration, build the worker image, provision
//! the internal network, spawn the sandbox pool, then serve HTTP (always)
//! and Kafka (best-effort) until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use bollard::Docker;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sandbox_runner::config::Config;
use sandbox_runner::http::{self, AppState};
use sandbox_runner::observer::ObservationBus;
use sandbox_runner::pool::PoolAllocator;
use sandbox_runner::{image, queue, sandbox};

/// Distinguishes pool-initialization failure from every other startup or
/// runtime failure, since the two map to different process exit codes.
enum RunError {
    PoolInit(anyhow::Error),
    Other(anyhow::Error),
}

impl RunError {
    fn exit_code(&self) -> i32 {
        match self {
            RunError::PoolInit(_) => 2,
            RunError::Other(_) => 1,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::PoolInit(err) | RunError::Other(err) => write!(f, "{err}"),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let exit_code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "sandbox-runner exited with an error");
            err.exit_code()
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<(), RunError> {
    let config = Config::from_env().context("failed to load configuration").map_err(RunError::Other)?;
    info!(pool_size = config.pool_size, "starting sandbox-runner");

    let docker = Docker::connect_with_local_defaults()
        .context("failed to connect to docker daemon")
        .map_err(RunError::Other)?;

    sandbox::ensure_worker_network(&docker)
        .await
        .context("failed to provision worker network")
        .map_err(RunError::Other)?;
    sandbox::connect_self_to_worker_network(&docker).await;

    image::build_worker_image(&docker).await.context("failed to build worker image").map_err(RunError::Other)?;

    sandbox::cleanup_old_workers(&docker)
        .await
        .context("failed to clean up leftover worker containers")
        .map_err(RunError::Other)?;

    let handles = sandbox::spawn_pool(&docker, &config)
        .await
        .context("failed to spawn sandbox pool")
        .map_err(RunError::PoolInit)?;
    info!(spawned = handles.len(), requested = config.pool_size, "sandbox pool ready");

    let http_client = reqwest::Client::new();
    let pool = PoolAllocator::new(handles, http_client);
    let bus = Arc::new(ObservationBus::new());
    let config = Arc::new(config);

    let shutdown = CancellationToken::new();

    let queue_handle = if config.kafka_bootstrap_servers.is_some() {
        match start_queue_ingress(pool.clone(), bus.clone(), config.clone(), shutdown.clone()).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "queue ingress failed to start, continuing with HTTP only");
                None
            }
        }
    } else {
        info!("no kafka bootstrap servers configured, HTTP ingress only");
        None
    };

    let app_state = AppState { pool: pool.clone(), bus: bus.clone(), config: config.clone() };
    let router = http::router(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .context("failed to bind HTTP listener")
        .map_err(RunError::Other)?;
    info!(addr = %listener.local_addr().map_err(anyhow::Error::from).map_err(RunError::Other)?, "HTTP ingress listening");

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        server_shutdown.cancelled().await;
    });

    tokio::select! {
        result = server => {
            result.context("HTTP server error").map_err(RunError::Other)?;
        }
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    }

    if let Some(handle) = queue_handle {
        let _ = handle.await;
    }

    info!("tearing down sandbox pool");
    for index in 0..pool.len() {
        if let Some(sandbox_handle) = pool.handle_for(index).await {
            sandbox::terminate(&docker, &sandbox_handle).await;
        }
    }

    Ok(())
}

async fn start_queue_ingress(
    pool: Arc<PoolAllocator>,
    bus: Arc<ObservationBus>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let (consumer, producer) = queue::connect(&config).await.context("failed to connect to kafka")?;
    let crypto = Arc::new(sandbox_runner::crypto::QueueCrypto::new(
        &config.chat_kafka_encryption_key,
        &config.runner_kafka_encryption_key,
    )?);

    Ok(tokio::spawn(async move {
        queue::run(consumer, producer, crypto, pool, bus, config, shutdown).await;
    }))
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}
