use std::{sync::Arc, time::Duration};

use dashmap::DashSet;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use super::{
    dns::Registrar,
    error::bounded,
    runtime::{ContainerEvent, ContainerInfo, EventStream, Runtime},
};

/// DNS suffix of the containers whose names are kept in weaveDNS.
pub const WEAVE_DOMAIN: &str = "weave.local";

/// Whether `x` is `y` or a subdomain of it. Neither is expected to start
/// with a '.'.
pub fn is_subdomain(x: &str, y: &str) -> bool {
    x == y || x.ends_with(&format!(".{y}"))
}

/// Follows container lifecycle events and keeps weaveDNS registrations in
/// line with the containers that are running in the managed domain.
///
/// Events are handled one at a time in arrival order. Each runtime or
/// registrar call is bounded by `timeout`; a failure is logged and the event
/// dropped.
pub struct Watcher {
    runtime: Arc<dyn Runtime>,
    registrar: Arc<dyn Registrar>,
    /// Network ids considered ours. Written by the driver, read here.
    networks: DashSet<String>,
    timeout: Duration,
}

impl Watcher {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registrar: Arc<dyn Registrar>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            registrar,
            networks: DashSet::new(),
            timeout,
        })
    }

    /// Subscribe to the runtime's events and process them on a background
    /// task until the subscription ends.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let events = self.runtime.events();
        let watcher = Arc::clone(self);

        tokio::spawn(async move { watcher.run(events).await })
    }

    pub async fn run(&self, mut events: EventStream) {
        info!("[Watcher]: Listening for container events");

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => self.handle_event(&event).await,
                Err(e) => warn!("[Watcher]: Error on event stream: {e:#}"),
            }
        }

        info!("[Watcher]: Event stream closed");
    }

    pub fn watch_network(&self, id: &str) {
        debug!("[Watcher]: Watch network {}", id);
        self.networks.insert(id.to_string());
    }

    pub fn unwatch_network(&self, id: &str) {
        debug!("[Watcher]: Unwatch network {}", id);
        self.networks.remove(id);
    }

    pub fn is_watching(&self, id: &str) -> bool {
        self.networks.contains(id)
    }

    pub async fn handle_event(&self, event: &ContainerEvent) {
        match event.action.as_str() {
            "start" => self.container_started(&event.id).await,
            "die" => self.container_died(&event.id).await,
            _ => {}
        }
    }

    async fn container_started(&self, id: &str) {
        debug!("[Watcher]: Container started {}", id);

        // The watched networks are not consulted: membership is decided by
        // the container's domain alone.
        let Some(info) = self.inspect_in_domain(id).await else {
            return;
        };

        let fqdn = format!("{}.{}", info.hostname, info.domainname);
        let op = format!("register {fqdn} with weaveDNS");
        match bounded(&op, self.timeout, self.registrar.register(id, &fqdn, &info.ip)).await {
            Ok(Ok(())) => info!("[Watcher]: Registered {} -> {}", fqdn, info.ip),
            Ok(Err(e)) => warn!("[Watcher]: Unable to register with weaveDNS: {e:#}"),
            Err(e) => warn!("[Watcher]: Unable to register with weaveDNS: {e}"),
        }
    }

    async fn container_died(&self, id: &str) {
        debug!("[Watcher]: Container died {}", id);

        let Some(info) = self.inspect_in_domain(id).await else {
            return;
        };

        let op = format!("deregister {id} from weaveDNS");
        match bounded(&op, self.timeout, self.registrar.deregister(id, &info.ip)).await {
            Ok(Ok(())) => info!("[Watcher]: Deregistered {} ({})", id, info.ip),
            Ok(Err(e)) => warn!("[Watcher]: Unable to deregister with weaveDNS: {e:#}"),
            Err(e) => warn!("[Watcher]: Unable to deregister with weaveDNS: {e}"),
        }
    }

    /// Inspect `id`, keeping it only when it lives in the managed domain.
    async fn inspect_in_domain(&self, id: &str) -> Option<ContainerInfo> {
        let op = format!("inspect container {id}");
        let info = match bounded(&op, self.timeout, self.runtime.inspect(id)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!("[Watcher]: Error inspecting container: {e:#}");
                return None;
            }
            Err(e) => {
                warn!("[Watcher]: Error inspecting container: {e}");
                return None;
            }
        };

        is_subdomain(&info.domainname, WEAVE_DOMAIN).then_some(info)
    }
}
