use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::stream::BoxStream;

mod docker;

pub use docker::DockerRuntime;

/// The parts of an inspected container the plugin cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub hostname: String,
    pub domainname: String,
    pub ip: String,
}

/// A container lifecycle event, `action` being e.g. `start` or `die`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub id: String,
    pub action: String,
}

pub type EventStream = BoxStream<'static, anyhow::Result<ContainerEvent>>;

/// Container runtime API as consumed by the plugin.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn inspect(&self, id: &str) -> anyhow::Result<ContainerInfo>;

    /// Subscribe to container lifecycle events.
    fn events(&self) -> EventStream;
}

/// Where a weave HTTP service lives: either a fixed base URL or a
/// well-known container whose address is looked up on every call.
#[derive(Clone)]
pub enum ServiceAddr {
    Fixed(String),
    Container {
        name: String,
        port: u16,
        runtime: Arc<dyn Runtime>,
    },
}

impl ServiceAddr {
    pub async fn base_url(&self) -> anyhow::Result<String> {
        match self {
            ServiceAddr::Fixed(url) => Ok(url.trim_end_matches('/').to_string()),
            ServiceAddr::Container {
                name,
                port,
                runtime,
            } => {
                let info = runtime
                    .inspect(name)
                    .await
                    .with_context(|| format!("Failed to inspect container {name}"))?;
                if info.ip.is_empty() {
                    anyhow::bail!("Container {name} has no IP address");
                }
                Ok(format!("http://{}:{}", info.ip, port))
            }
        }
    }
}

impl std::fmt::Debug for ServiceAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceAddr::Fixed(url) => f.debug_tuple("Fixed").field(url).finish(),
            ServiceAddr::Container { name, port, .. } => f
                .debug_struct("Container")
                .field("name", name)
                .field("port", port)
                .finish_non_exhaustive(),
        }
    }
}
