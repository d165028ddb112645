//! Sandbox Lifecycle (C3): network provisioning, container spawn/teardown,
//! and readiness polling for the worker containers the Pool Allocator hands
//! out to requests.
//!
//! Grounded directly on the source `ContainerPool`'s Docker-SDK calls,
//! translated into `bollard` and the teacher's `DockerProvider`/
//! `DockerSandbox` shape. Unlike the teacher, sandboxes here are addressed
//! purely by container IP on an internal bridge network — there is no host
//! port publishing and no general-purpose `Sandbox` trait, since this
//! service only ever runs one kind of sandbox.

use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::models::HostConfig;
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, ListNetworksOptions};
use tracing::{info, warn};

use crate::config::Config;
use crate::image::WORKER_IMAGE_TAG;

/// Name of the internal-only bridge network all worker sandboxes join.
pub const WORKER_NETWORK_NAME: &str = "runner-worker-net";

/// Prefix used for deterministic sandbox container names and for the
/// leftover-cleanup filter.
pub const WORKER_NAME_PREFIX: &str = "runner-worker-";

const EXECUTOR_PORT: u16 = 8000;
const READY_POLL_ATTEMPTS: u32 = 30;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors from the sandbox lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("sandbox {0} never reported an IP address on the worker network")]
    NoAddress(String),

    #[error("sandbox {0} did not become ready within the poll window")]
    NotReady(String),

    #[error("all sandbox spawns failed")]
    AllSpawnsFailed,
}

/// A single spawned worker container: where to reach it and its Docker id.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    pub name: String,
    pub container_id: String,
    pub ip: String,
}

impl SandboxHandle {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, EXECUTOR_PORT)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }

    pub fn execute_url(&self) -> String {
        format!("{}/execute", self.base_url())
    }
}

/// Ensures the internal worker network exists, creating it if absent.
pub async fn ensure_worker_network(docker: &Docker) -> Result<(), ProviderError> {
    let existing = docker
        .list_networks(Some(ListNetworksOptions {
            filters: std::collections::HashMap::from([(
                "name".to_string(),
                vec![WORKER_NETWORK_NAME.to_string()],
            )]),
        }))
        .await?;

    if !existing.is_empty() {
        info!(network = WORKER_NETWORK_NAME, "using existing worker network");
        return Ok(());
    }

    docker
        .create_network(CreateNetworkOptions {
            name: WORKER_NETWORK_NAME,
            driver: "bridge",
            internal: true,
            ..Default::default()
        })
        .await?;
    info!(network = WORKER_NETWORK_NAME, "created internal worker network");
    Ok(())
}

/// Attaches the runner's own container to the worker network so it can
/// reach sandboxes by address. A no-op (with a log line) when running
/// outside Docker, since there is then no self-container to attach.
pub async fn connect_self_to_worker_network(docker: &Docker) {
    let hostname = match hostname() {
        Some(h) => h,
        None => return,
    };

    let inspect = match docker.inspect_container(&hostname, None).await {
        Ok(inspect) => inspect,
        Err(_) => {
            info!("not running inside a docker container, skipping network self-attach");
            return;
        }
    };

    let already_connected = inspect
        .network_settings
        .as_ref()
        .and_then(|s| s.networks.as_ref())
        .map(|networks| networks.contains_key(WORKER_NETWORK_NAME))
        .unwrap_or(false);

    if already_connected {
        info!("runner already connected to worker network");
        return;
    }

    if let Err(err) = docker
        .connect_network(
            WORKER_NETWORK_NAME,
            ConnectNetworkOptions {
                container: hostname.as_str(),
                ..Default::default()
            },
        )
        .await
    {
        warn!(error = %err, "failed to connect runner to worker network");
    } else {
        info!("connected runner to worker network");
    }
}

fn hostname() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Removes any leftover sandbox containers from a previous, uncleanly
/// terminated run.
pub async fn cleanup_old_workers(docker: &Docker) -> Result<(), ProviderError> {
    let filters = std::collections::HashMap::from([(
        "name".to_string(),
        vec![WORKER_NAME_PREFIX.to_string()],
    )]);

    let containers = docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await?;

    for container in containers {
        let Some(id) = container.id else { continue };
        let name = container
            .names
            .and_then(|n| n.into_iter().next())
            .unwrap_or_else(|| id.clone());
        info!(container = %name, "removing leftover worker container");
        if let Err(err) = docker
            .remove_container(&id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
        {
            warn!(container = %name, error = %err, "failed to remove leftover container");
        }
    }

    Ok(())
}

/// Spawns the full pool of `config.pool_size` sandboxes concurrently.
/// Individual spawn failures are logged and dropped; only a total failure
/// (every spawn failed) is an error, matching the source pool's
/// "don't abort initialization unless all spawns failed" policy.
pub async fn spawn_pool(docker: &Docker, config: &Config) -> Result<Vec<SandboxHandle>, ProviderError> {
    let spawns = (0..config.pool_size).map(|i| spawn_single_worker(docker, config, i));
    let results = futures::future::join_all(spawns).await;

    let mut handles = Vec::new();
    for result in results {
        match result {
            Ok(handle) => handles.push(handle),
            Err(err) => warn!(error = %err, "failed to spawn sandbox"),
        }
    }

    if handles.is_empty() {
        return Err(ProviderError::AllSpawnsFailed);
    }

    Ok(handles)
}

async fn spawn_single_worker(
    docker: &Docker,
    config: &Config,
    index: usize,
) -> Result<SandboxHandle, ProviderError> {
    let name = format!("{WORKER_NAME_PREFIX}{index}");

    let cpu_period: i64 = 100_000;
    let cpu_quota = (config.worker_cpu_limit * cpu_period as f64) as i64;

    let networking_config = NetworkingConfig {
        endpoints_config: std::collections::HashMap::from([(
            WORKER_NETWORK_NAME.to_string(),
            Default::default(),
        )]),
    };

    let host_config = HostConfig {
        network_mode: Some(WORKER_NETWORK_NAME.to_string()),
        memory: parse_memory_limit(&config.worker_memory_limit),
        cpu_period: Some(cpu_period),
        cpu_quota: Some(cpu_quota),
        pids_limit: Some(50),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        cap_drop: Some(vec!["ALL".to_string()]),
        readonly_rootfs: Some(false),
        ..Default::default()
    };

    let container_config = ContainerConfig {
        image: Some(WORKER_IMAGE_TAG.to_string()),
        env: Some(vec![
            "PYTHONDONTWRITEBYTECODE=1".to_string(),
            "PYTHONUNBUFFERED=1".to_string(),
        ]),
        host_config: Some(host_config),
        networking_config: Some(networking_config),
        ..Default::default()
    };

    let response = docker
        .create_container(
            Some(CreateContainerOptions { name: name.clone(), platform: None }),
            container_config,
        )
        .await?;
    let container_id = response.id;

    docker
        .start_container(&container_id, None::<StartContainerOptions<String>>)
        .await?;

    // Brief wait for network assignment, matching the source's fixed delay.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let inspect = docker.inspect_container(&container_id, None).await?;
    let ip = inspect
        .network_settings
        .as_ref()
        .and_then(|s| s.networks.as_ref())
        .and_then(|networks| networks.get(WORKER_NETWORK_NAME))
        .and_then(|n| n.ip_address.clone())
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| ProviderError::NoAddress(name.clone()))?;

    info!(sandbox = %name, ip = %ip, "sandbox spawned");

    let handle = SandboxHandle { name: name.clone(), container_id, ip };
    wait_for_worker_ready(&handle).await?;
    info!(sandbox = %name, "sandbox ready");

    Ok(handle)
}

fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit = limit.trim();
    let (digits, multiplier) = if let Some(v) = limit.strip_suffix(['g', 'G']) {
        (v, 1024 * 1024 * 1024)
    } else if let Some(v) = limit.strip_suffix(['m', 'M']) {
        (v, 1024 * 1024)
    } else if let Some(v) = limit.strip_suffix(['k', 'K']) {
        (v, 1024)
    } else {
        (limit, 1)
    };
    digits.trim().parse::<i64>().ok().map(|n| n * multiplier)
}

async fn wait_for_worker_ready(handle: &SandboxHandle) -> Result<(), ProviderError> {
    let client = reqwest::Client::new();
    let url = handle.health_url();

    for _ in 0..READY_POLL_ATTEMPTS {
        if let Ok(response) = client.get(&url).send().await {
            if response.status().is_success() {
                return Ok(());
            }
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }

    Err(ProviderError::NotReady(handle.name.clone()))
}

/// Stops and removes a sandbox. Idempotent: errors are logged, not
/// propagated, since teardown runs best-effort during shutdown.
pub async fn terminate(docker: &Docker, handle: &SandboxHandle) {
    if let Err(err) = docker
        .stop_container(&handle.container_id, Some(StopContainerOptions { t: 5 }))
        .await
    {
        warn!(sandbox = %handle.name, error = %err, "failed to stop sandbox");
    }

    if let Err(err) = docker
        .remove_container(
            &handle.container_id,
            Some(RemoveContainerOptions { force: true, ..Default::default() }),
        )
        .await
    {
        warn!(sandbox = %handle.name, error = %err, "failed to remove sandbox");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_megabyte_suffix() {
        assert_eq!(parse_memory_limit("128m"), Some(128 * 1024 * 1024));
    }

    #[test]
    fn parses_gigabyte_suffix() {
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
    }

    #[test]
    fn parses_bare_bytes() {
        assert_eq!(parse_memory_limit("1048576"), Some(1048576));
    }
}
