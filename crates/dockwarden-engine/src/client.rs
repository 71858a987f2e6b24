//! Engine adapter: a thin, typed interface over the container/image API.
//!
//! The [`Engine`] trait is the seam between the control loops and the
//! engine transport. The production implementation, [`DockerEngine`], talks
//! to a local Docker-compatible daemon through bollard with the API version
//! negotiated at connect time. Policy (filtering, retry, scheduling) lives
//! with the callers; everything here is mechanism.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::models::EndpointSettings;
use bollard::network::ConnectNetworkOptions;
use bollard::Docker;
use dockwarden_error::CommonError;
use futures::StreamExt;
use tracing::{debug, info};

use crate::auth;
use crate::error::{EngineError, Result};
use crate::image::ImageRef;
use crate::snapshot::ContainerSnapshot;

/// Deadline for the startup/health-check ping.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for listing containers.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Include non-running containers.
    pub include_stopped: bool,
    /// Engine-side label filter (`key` or `key=value`).
    pub label_filter: Option<String>,
}

/// Shared engine trait object.
pub type DynEngine = Arc<dyn Engine>;

/// Operations the control loops need from a container engine.
///
/// Every call accepts its deadline from the caller where one applies; pull
/// is deliberately unbounded because image sizes vary.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Succeeds iff the engine answers within [`PING_TIMEOUT`].
    async fn ping(&self) -> Result<()>;

    /// Lists containers. Running-only unless `include_stopped` is set.
    async fn list(&self, opts: ListOptions) -> Result<Vec<ContainerSnapshot>>;

    /// Full snapshot of a single container.
    async fn inspect(&self, id: &str) -> Result<ContainerSnapshot>;

    /// Stops a container, allowing `timeout` before the forced kill.
    async fn stop(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Starts a container.
    async fn start(&self, id: &str) -> Result<()>;

    /// Restarts a container, allowing `timeout` before the forced kill.
    async fn restart(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Forcibly removes a container.
    async fn remove(&self, id: &str, remove_volumes: bool) -> Result<()>;

    /// Recreates a container in place, preserving name, volumes, and
    /// network attachments. Returns the new container id.
    async fn recreate(&self, id: &str, timeout: Duration) -> Result<String>;

    /// Pulls an image, draining the progress stream.
    async fn pull(&self, image: &ImageRef) -> Result<()>;

    /// Returns the first repo digest for an image, or its local content id
    /// when no repo digest is recorded.
    async fn image_digest(&self, image: &ImageRef) -> Result<String>;

    /// Removes an image, pruning dangling children. Not forced.
    async fn remove_image(&self, image_id: &str) -> Result<()>;
}

/// Engine adapter backed by a local Docker-compatible daemon.
pub struct DockerEngine {
    docker: Docker,
    registry_secret: Option<PathBuf>,
}

impl DockerEngine {
    /// Connects to the daemon using the standard environment (honoring
    /// `DOCKER_HOST`) and negotiates the API version.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or refuses version
    /// negotiation.
    pub async fn connect(registry_secret: Option<PathBuf>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        let docker = docker.negotiate_version().await?;
        Ok(Self {
            docker,
            registry_secret,
        })
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        tokio::time::timeout(PING_TIMEOUT, self.docker.ping())
            .await
            .map_err(|_| CommonError::timeout("engine did not answer ping in time"))??;
        Ok(())
    }

    async fn list(&self, opts: ListOptions) -> Result<Vec<ContainerSnapshot>> {
        let mut filters = HashMap::new();
        if let Some(label) = opts.label_filter {
            filters.insert("label".to_string(), vec![label]);
        }

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: opts.include_stopped,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .map(ContainerSnapshot::from_summary)
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerSnapshot> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(ContainerSnapshot::from_inspect(inspect))
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: secs_i64(timeout) }))
            .await?;
        debug!(container = short_id(id), "stopped container");
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        debug!(container = short_id(id), "started container");
        Ok(())
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<()> {
        self.docker
            .restart_container(id, Some(RestartContainerOptions { t: secs_isize(timeout) }))
            .await?;
        debug!(container = short_id(id), "restarted container");
        Ok(())
    }

    async fn remove(&self, id: &str, remove_volumes: bool) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: remove_volumes,
                    ..Default::default()
                }),
            )
            .await?;
        debug!(container = short_id(id), "removed container");
        Ok(())
    }

    async fn recreate(&self, id: &str, timeout: Duration) -> Result<String> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let name = inspect
            .name
            .as_deref()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();
        if name.is_empty() {
            return Err(CommonError::internal(format!("container {id} has no name")).into());
        }
        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let old_short_id = short_id(inspect.id.as_deref().unwrap_or(id)).to_string();

        // Capture every attached network's endpoint settings before the
        // container disappears.
        let mut endpoints: Vec<(String, EndpointSettings)> = inspect
            .network_settings
            .and_then(|ns| ns.networks)
            .unwrap_or_default()
            .into_iter()
            .map(|(network, endpoint)| (network, sanitize_endpoint(&old_short_id, endpoint)))
            .collect();

        let mut create: Config<String> = inspect.config.unwrap_or_default().into();
        create.host_config = inspect.host_config;

        debug!(container = %name, "recreating container");

        if running {
            self.docker
                .stop_container(id, Some(StopContainerOptions { t: secs_i64(timeout) }))
                .await
                .map_err(|e| recreate_error(&name, "stop", e))?;
            debug!(container = %name, "stopped container");
        }

        // Volumes are always preserved on this path, independent of the
        // remove-volumes policy for unrelated removes.
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| recreate_error(&name, "remove", e))?;
        debug!(container = %name, "removed old container");

        // The create call accepts a single endpoint; the rest are connected
        // before start so the container reappears on every original network.
        if !endpoints.is_empty() {
            let (network, endpoint) = endpoints.remove(0);
            create.networking_config = Some(NetworkingConfig {
                endpoints_config: HashMap::from([(network, endpoint)]),
            });
        }

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                create,
            )
            .await
            .map_err(|e| recreate_error(&name, "create", e))?;
        let new_id = created.id;
        debug!(container = %name, id = short_id(&new_id), "created new container");

        for (network, endpoint) in endpoints {
            self.docker
                .connect_network(
                    &network,
                    ConnectNetworkOptions {
                        container: new_id.clone(),
                        endpoint_config: endpoint,
                    },
                )
                .await
                .map_err(|e| recreate_error(&name, "connect", e))?;
        }

        self.docker
            .start_container(&new_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| recreate_error(&name, "start", e))?;
        info!(container = %name, id = short_id(&new_id), "started recreated container");

        Ok(new_id)
    }

    async fn pull(&self, image: &ImageRef) -> Result<()> {
        let credentials = auth::resolve(image, self.registry_secret.as_deref());
        let options = CreateImageOptions {
            from_image: image.as_str().to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(frame) = stream.next().await {
            let progress = frame.map_err(|e| EngineError::PullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(error) = progress.error {
                return Err(EngineError::PullFailed {
                    image: image.to_string(),
                    reason: error,
                });
            }
            if let Some(status) = progress.status {
                debug!(image = %image, status = %status, "pull progress");
            }
        }

        info!(image = %image, "pulled image");
        Ok(())
    }

    async fn image_digest(&self, image: &ImageRef) -> Result<String> {
        let inspect = self.docker.inspect_image(image.as_str()).await?;

        if let Some(repo_digest) = inspect.repo_digests.as_ref().and_then(|d| d.first()) {
            return Ok(repo_digest
                .split_once('@')
                .map_or_else(|| repo_digest.clone(), |(_, digest)| digest.to_string()));
        }

        Ok(inspect.id.unwrap_or_default())
    }

    async fn remove_image(&self, image_id: &str) -> Result<()> {
        self.docker
            .remove_image(
                image_id,
                Some(RemoveImageOptions {
                    force: false,
                    noprune: false,
                }),
                None,
            )
            .await?;
        debug!(image = short_id(image_id), "removed image");
        Ok(())
    }
}

/// Reproduces an endpoint for the replacement container. Static
/// configuration (IPAM, links, aliases, driver options) is kept; values the
/// daemon assigned at runtime are cleared so fresh ones get allocated. The
/// MAC in particular must not be reused: bridged-network daemons cache DNS
/// against it, and a copied MAC yields stale resolution.
fn sanitize_endpoint(old_short_id: &str, endpoint: EndpointSettings) -> EndpointSettings {
    let aliases = endpoint
        .aliases
        .map(|aliases| {
            aliases
                .into_iter()
                .filter(|alias| alias != old_short_id)
                .collect::<Vec<_>>()
        })
        .filter(|aliases| !aliases.is_empty());

    EndpointSettings {
        ipam_config: endpoint.ipam_config,
        links: endpoint.links,
        aliases,
        driver_opts: endpoint.driver_opts,
        ..Default::default()
    }
}

fn recreate_error(
    container: &str,
    step: &'static str,
    source: bollard::errors::Error,
) -> EngineError {
    EngineError::Recreate {
        container: container.to_string(),
        step,
        source,
    }
}

fn secs_i64(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX)
}

fn secs_isize(timeout: Duration) -> isize {
    isize::try_from(timeout.as_secs()).unwrap_or(isize::MAX)
}

/// First 12 characters of an engine id, for logs.
fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::EndpointIpamConfig;

    #[test]
    fn sanitize_endpoint_clears_runtime_fields() {
        let endpoint = EndpointSettings {
            mac_address: Some("02:42:ac:11:00:02".into()),
            endpoint_id: Some("ep-1".into()),
            network_id: Some("net-1".into()),
            gateway: Some("172.17.0.1".into()),
            ip_address: Some("172.17.0.2".into()),
            ip_prefix_len: Some(16),
            aliases: Some(vec!["api".into(), "abcdef123456".into()]),
            ipam_config: Some(EndpointIpamConfig {
                ipv4_address: Some("10.0.0.9".into()),
                ..Default::default()
            }),
            links: Some(vec!["db".into()]),
            ..Default::default()
        };

        let cleaned = sanitize_endpoint("abcdef123456", endpoint);

        assert_eq!(cleaned.mac_address, None);
        assert_eq!(cleaned.endpoint_id, None);
        assert_eq!(cleaned.network_id, None);
        assert_eq!(cleaned.gateway, None);
        assert_eq!(cleaned.ip_address, None);
        assert_eq!(cleaned.ip_prefix_len, None);
        // Static assignments and user aliases survive; the old short-id
        // alias does not.
        assert_eq!(cleaned.aliases, Some(vec!["api".to_string()]));
        assert_eq!(
            cleaned.ipam_config.unwrap().ipv4_address.as_deref(),
            Some("10.0.0.9")
        );
        assert_eq!(cleaned.links, Some(vec!["db".to_string()]));
    }

    #[test]
    fn sanitize_endpoint_drops_empty_alias_list() {
        let endpoint = EndpointSettings {
            aliases: Some(vec!["abcdef123456".into()]),
            ..Default::default()
        };
        assert_eq!(sanitize_endpoint("abcdef123456", endpoint).aliases, None);
    }

    #[test]
    fn short_id_truncates_long_ids_only() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
