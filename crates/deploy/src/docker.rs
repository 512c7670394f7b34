//! Docker client for the local devnet containers used by the harness.

use std::{collections::HashMap, collections::HashSet, mem, path::Path, time::Duration};

use anyhow::{Context, Result};
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
    },
    image::CreateImageOptions,
    network::CreateNetworkOptions,
    secret::{HostConfig, PortBinding},
};
use derive_more::Deref;
use futures::{StreamExt, executor::block_on, future::join_all};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

/// Timeout for stopping containers when the client is dropped.
const DOCKER_DROP_TIMEOUT: Duration = Duration::from_secs(60);

/// A TCP port published from a container. Host port `0` lets Docker pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

impl PortMapping {
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port,
        }
    }

    fn key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// A Docker image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerImage {
    pub image: String,
    pub tag: String,
}

impl DockerImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }
}

impl std::fmt::Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

/// What to run in a container.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub image: DockerImage,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
    pub ports: Vec<PortMapping>,
    /// Volume binds in `host:container:mode` form.
    pub binds: Vec<String>,
}

impl ServiceConfig {
    pub fn new(image: DockerImage) -> Self {
        Self {
            image,
            entrypoint: None,
            cmd: Vec::new(),
            ports: Vec::new(),
            binds: Vec::new(),
        }
    }

    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(vec![entrypoint.into()]);
        self
    }

    pub fn cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.ports.push(mapping);
        self
    }

    pub fn bind(mut self, host_path: &Path, container_path: &Path, mode: &str) -> Self {
        self.binds.push(format!(
            "{}:{}:{}",
            host_path.display(),
            container_path.display(),
            mode
        ));
        self
    }
}

/// A started container and the host ports it was given.
#[derive(Debug, Clone)]
pub struct ServiceHandler {
    pub container_id: String,
    pub container_name: String,
    /// Container port to published host port.
    pub host_ports: HashMap<u16, u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevnetDockerConfig {
    /// Name of the bridge network the containers join.
    pub net_name: String,
    /// Leave containers running when the client is dropped.
    pub no_cleanup: bool,
    /// Forward container output to the `debug` log.
    pub stream_logs: bool,
}

impl Default for DevnetDockerConfig {
    fn default() -> Self {
        Self {
            net_name: "vedrome-devnet".to_string(),
            no_cleanup: false,
            stream_logs: false,
        }
    }
}

/// Docker client that removes the containers and network it created when dropped.
#[derive(Deref)]
pub struct DevnetDocker {
    #[deref]
    docker: Docker,
    containers: HashSet<String>,
    network_id: String,
    config: DevnetDockerConfig,
}

impl Drop for DevnetDocker {
    fn drop(&mut self) {
        if self.config.no_cleanup {
            tracing::debug!("Container cleanup disabled, leaving devnet running");
            return;
        }

        let docker = self.docker.clone();
        let containers = mem::take(&mut self.containers);
        let network_id = self.network_id.clone();

        tracing::debug!(containers = containers.len(), "Cleaning up devnet");

        let cleanup = async {
            let stops = containers
                .iter()
                .map(|container_id| Self::remove_container(&docker, container_id))
                .collect::<Vec<_>>();

            timeout(DOCKER_DROP_TIMEOUT, join_all(stops))
                .await
                .context("Timed out stopping containers")?;

            docker
                .remove_network(&network_id)
                .await
                .context("Failed to remove network")?;

            Ok::<_, anyhow::Error>(())
        };

        match block_on(cleanup) {
            Ok(()) => tracing::info!("Devnet cleaned up"),
            Err(e) => tracing::error!(error = ?e, "Failed to clean up devnet"),
        }
    }
}

impl DevnetDocker {
    const STOP_CONTAINER_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to the local Docker daemon and create the devnet network.
    pub async fn new(config: DevnetDockerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        tracing::debug!(network = %config.net_name, "Creating Docker network");

        let response = docker
            .create_network(CreateNetworkOptions {
                name: config.net_name.clone(),
                check_duplicate: true,
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .context("Failed to create Docker network")?;

        let network_id = if response.id.is_empty() {
            config.net_name.clone()
        } else {
            response.id
        };

        Ok(Self {
            docker,
            containers: HashSet::new(),
            network_id,
            config,
        })
    }

    /// Pull `image` unless it is already available locally.
    pub async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        let reference = image.to_string();
        if self.docker.inspect_image(&reference).await.is_ok() {
            tracing::debug!(image = %reference, "Image available locally");
            return Ok(());
        }

        tracing::info!(image = %reference, "Pulling image");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.image.clone(),
                tag: image.tag.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            let progress = progress.with_context(|| format!("Failed to pull {}", reference))?;
            if let Some(status) = progress.status {
                tracing::trace!(status, "Image pull");
            }
        }

        Ok(())
    }

    /// Create and start a container on the devnet network.
    pub async fn start_service(
        &mut self,
        container_name: &str,
        config: ServiceConfig,
    ) -> Result<ServiceHandler> {
        self.pull_image(&config.image).await?;

        let port_bindings = config
            .ports
            .iter()
            .map(|mapping| {
                (
                    mapping.key(),
                    Some(vec![PortBinding {
                        host_ip: Some("127.0.0.1".to_string()),
                        host_port: Some(mapping.host_port.to_string()),
                    }]),
                )
            })
            .collect::<HashMap<_, _>>();

        let container_config = Config {
            image: Some(config.image.to_string()),
            entrypoint: config.entrypoint,
            cmd: Some(config.cmd),
            exposed_ports: Some(
                config
                    .ports
                    .iter()
                    .map(|mapping| (mapping.key(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                binds: (!config.binds.is_empty()).then_some(config.binds),
                network_mode: Some(self.network_id.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_id = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name,
                    ..Default::default()
                }),
                container_config,
            )
            .await
            .with_context(|| format!("Failed to create container {}", container_name))?
            .id;

        self.containers.insert(container_id.clone());

        self.docker
            .start_container::<String>(&container_id, None)
            .await
            .with_context(|| format!("Failed to start container {}", container_name))?;

        if self.config.stream_logs {
            self.stream_logs(&container_id);
        }

        let host_ports = self.published_ports(&container_id, &config.ports).await?;

        tracing::debug!(container_id, container_name, ?host_ports, "Container started");

        Ok(ServiceHandler {
            container_id,
            container_name: container_name.to_string(),
            host_ports,
        })
    }

    /// Resolve the host ports Docker actually bound.
    async fn published_ports(
        &self,
        container_id: &str,
        ports: &[PortMapping],
    ) -> Result<HashMap<u16, u16>> {
        let info = self
            .docker
            .inspect_container(container_id, None)
            .await
            .context("Failed to inspect container")?;

        let bound = info
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        ports
            .iter()
            .map(|mapping| {
                let host_port = bound
                    .get(&mapping.key())
                    .and_then(|bindings| bindings.as_ref())
                    .and_then(|bindings| bindings.first())
                    .and_then(|binding| binding.host_port.as_deref())
                    .and_then(|port| port.parse::<u16>().ok())
                    .with_context(|| {
                        format!("Port {} was not published", mapping.container_port)
                    })?;
                Ok((mapping.container_port, host_port))
            })
            .collect()
    }

    fn stream_logs(&self, container_id: &str) {
        let mut logs = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            }),
        );
        let container_id = container_id.to_string();

        tokio::spawn(async move {
            while let Some(line) = logs.next().await {
                match line {
                    Ok(line) => tracing::debug!(container_id, %line),
                    Err(e) => {
                        tracing::debug!(container_id, error = %e, "Log stream closed");
                        break;
                    }
                }
            }
        });
    }

    async fn remove_container(docker: &Docker, container_id: &str) {
        // Either call fails when the container is already gone.
        let _ = docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: Self::STOP_CONTAINER_TIMEOUT.as_secs() as i64,
                }),
            )
            .await;
        let _ = docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        tracing::trace!(container_id, "Container removed");
    }
}
