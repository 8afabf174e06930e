use async_trait::async_trait;
use bollard::{
    models::{ContainerInspectResponse, EventMessage, EventMessageTypeEnum},
    query_parameters::{EventsOptions, InspectContainerOptions},
    Docker, API_DEFAULT_VERSION,
};
use futures::{StreamExt, TryStreamExt};

use super::{ContainerEvent, ContainerInfo, EventStream, Runtime};

/// Seconds before a request to the Docker daemon is abandoned.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// [`Runtime`] over the Docker Engine API.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to `host` (a unix socket path, with or without `unix://`), or
    /// to the platform default socket when none is given.
    pub fn connect(host: Option<&str>) -> anyhow::Result<Self> {
        let docker = match host {
            Some(host) => {
                let path = host.trim_start_matches("unix://");
                Docker::connect_with_unix(path, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?,
        };

        Ok(Self { docker })
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.docker.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn inspect(&self, id: &str) -> anyhow::Result<ContainerInfo> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        Ok(container_info(id, inspect))
    }

    fn events(&self) -> EventStream {
        self.docker
            .events(None::<EventsOptions>)
            .map_err(anyhow::Error::from)
            .try_filter_map(|msg| async move { Ok(container_event(msg)) })
            .boxed()
    }
}

fn container_info(id: &str, inspect: ContainerInspectResponse) -> ContainerInfo {
    let config = inspect.config.unwrap_or_default();

    // Prefer the default bridge address, as the top-level field used to be.
    let networks = inspect
        .network_settings
        .and_then(|settings| settings.networks)
        .unwrap_or_default();
    let address_of = |name: &str| {
        networks
            .get(name)
            .and_then(|net| net.ip_address.clone())
            .filter(|ip| !ip.is_empty())
    };
    let ip = address_of("bridge")
        .or_else(|| {
            let mut names: Vec<_> = networks.keys().collect();
            names.sort();
            names.into_iter().find_map(|name| address_of(name.as_str()))
        })
        .unwrap_or_default();

    ContainerInfo {
        id: inspect.id.unwrap_or_else(|| id.to_string()),
        hostname: config.hostname.unwrap_or_default(),
        domainname: config.domainname.unwrap_or_default(),
        ip,
    }
}

fn container_event(msg: EventMessage) -> Option<ContainerEvent> {
    if msg.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }

    Some(ContainerEvent {
        id: msg.actor?.id?,
        action: msg.action?,
    })
}
