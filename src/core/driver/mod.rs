use std::{
    net::IpAddr,
    sync::{Arc, RwLock},
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{sync::Mutex, task::JoinSet};

use super::{
    error::{bounded, PluginError},
    msg::{
        CapabilitiesResponse, EndpointInfoResponse, EndpointInterface, HandshakeResponse,
        InterfaceName, JoinResponse, StaticRoute, ROUTE_CONNECTED,
    },
    network::{mac_for, Allocator, VethNaming, VethPair, Wiring, WEAVE_BRIDGE},
    watcher::Watcher,
};

mod routes;

pub use routes::router;

/// Receiver name prefixing the driver's protocol methods.
pub const METHOD_RECEIVER: &str = "NetworkDriver";
/// Interface name prefix inside the container.
pub const DST_PREFIX: &str = "ethwe";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The remote network driver. Holds at most one network at a time.
pub struct Driver {
    version: String,
    network: Mutex<Option<String>>,
    nameserver: RwLock<Option<IpAddr>>,
    watcher: Arc<Watcher>,
    allocator: Arc<dyn Allocator>,
    wiring: Arc<dyn Wiring>,
    naming: VethNaming,
    timeout: Duration,
    releases: Mutex<JoinSet<()>>,
}

impl Driver {
    pub fn new(
        watcher: Arc<Watcher>,
        allocator: Arc<dyn Allocator>,
        wiring: Arc<dyn Wiring>,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            network: Mutex::new(None),
            nameserver: RwLock::new(None),
            watcher,
            allocator,
            wiring,
            naming: VethNaming::default(),
            timeout: DEFAULT_TIMEOUT,
            releases: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_naming(mut self, naming: VethNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Bound applied to every allocator and wiring call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn current_network(&self) -> Option<String> {
        self.network.lock().await.clone()
    }

    /// Configure the DNS server a route is handed out for on Join.
    pub fn set_nameserver(&self, address: &str) -> Result<(), PluginError> {
        let ip = address
            .parse::<IpAddr>()
            .map_err(|_| PluginError::InvalidNameserver {
                address: address.to_string(),
            })?;

        // A poisoned lock still holds a plain value worth overwriting.
        let mut nameserver = self
            .nameserver
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *nameserver = Some(ip);

        info!("[Driver]: Nameserver set to {}", ip);
        Ok(())
    }

    pub fn nameserver(&self) -> Option<IpAddr> {
        *self
            .nameserver
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn handshake(&self) -> HandshakeResponse {
        HandshakeResponse {
            implements: vec![METHOD_RECEIVER.to_string()],
        }
    }

    pub fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            scope: "global".to_string(),
        }
    }

    pub async fn create_network(&self, network_id: &str) -> Result<(), PluginError> {
        let mut network = self.network.lock().await;

        if let Some(existing) = network.as_ref() {
            return Err(PluginError::AlreadyProvisioned {
                network: existing.clone(),
            });
        }

        *network = Some(network_id.to_string());
        self.watcher.watch_network(network_id);

        info!("[Driver]: Create network {}", network_id);
        Ok(())
    }

    pub async fn delete_network(&self, network_id: &str) -> Result<(), PluginError> {
        let mut network = self.network.lock().await;

        if network.as_deref() != Some(network_id) {
            return Err(PluginError::NetworkNotFound {
                network: network_id.to_string(),
            });
        }

        *network = None;
        self.watcher.unwatch_network(network_id);

        info!("[Driver]: Destroy network {}", network_id);
        Ok(())
    }

    pub async fn create_endpoint(
        &self,
        network_id: &str,
        endpoint_id: &str,
    ) -> Result<EndpointInterface, PluginError> {
        if self.network.lock().await.as_deref() != Some(network_id) {
            return Err(PluginError::NoSuchNetwork {
                network: network_id.to_string(),
            });
        }

        let op = format!("allocate IP for endpoint {endpoint_id}");
        let cidr = bounded(&op, self.timeout, self.allocator.allocate(endpoint_id))
            .await?
            .map_err(|e| {
                warn!("[Driver]: Error allocating IP: {e:#}");
                PluginError::allocation_failed(endpoint_id, format!("{e:#}"))
            })?;
        debug!("[Driver]: Got IP from IPAM {}", cidr);

        let iface = EndpointInterface {
            address: cidr.to_string(),
            mac_address: mac_for(cidr.addr()),
        };

        info!("[Driver]: Create endpoint {} {:?}", endpoint_id, iface);
        Ok(iface)
    }

    /// Give the endpoint's address back. Failures are logged, never returned:
    /// the caller has already been answered.
    pub async fn release_endpoint(&self, endpoint_id: &str) {
        let op = format!("release IP of endpoint {endpoint_id}");
        match bounded(&op, self.timeout, self.allocator.release(endpoint_id)).await {
            Ok(Ok(())) => info!("[Driver]: Delete endpoint {}", endpoint_id),
            Ok(Err(e)) => warn!("[Driver]: Error releasing IP: {e:#}"),
            Err(e) => warn!("[Driver]: Error releasing IP: {e}"),
        }
    }

    /// Release the endpoint's address on a background task. Outstanding
    /// releases are awaited by [`Driver::drain_releases`].
    pub async fn spawn_release(self: &Arc<Self>, endpoint_id: String) {
        let driver = self.clone();
        let mut releases = self.releases.lock().await;
        while releases.try_join_next().is_some() {}
        releases.spawn(async move { driver.release_endpoint(&endpoint_id).await });
    }

    /// Wait for every release started by [`Driver::spawn_release`].
    pub async fn drain_releases(&self) {
        let mut releases = self.releases.lock().await;
        if !releases.is_empty() {
            debug!("[Driver]: Waiting for {} address releases", releases.len());
        }
        while releases.join_next().await.is_some() {}
    }

    pub fn endpoint_info(&self, endpoint_id: &str) -> EndpointInfoResponse {
        info!("[Driver]: Endpoint info {}", endpoint_id);
        EndpointInfoResponse::default()
    }

    /// Create the endpoint's veth pair and put its host end on the weave
    /// bridge. If anything after creating the pair fails, the pair is
    /// deleted again before the error is returned.
    pub async fn join(
        &self,
        network_id: &str,
        endpoint_id: &str,
        sandbox_key: &str,
    ) -> Result<JoinResponse, PluginError> {
        if endpoint_id.is_empty() {
            return Err(PluginError::InvalidEndpoint {
                endpoint: endpoint_id.to_string(),
            });
        }

        let pair = VethPair::for_endpoint(endpoint_id, self.naming);

        let op = format!("create veth pair {}", pair.local);
        match bounded(&op, self.timeout, self.wiring.create_pair(&pair)).await {
            Ok(created) => created?,
            Err(e) => {
                // The kernel may still complete the request after we gave up.
                self.remove_pair(&pair).await;
                return Err(e);
            }
        }

        let op = format!("attach {} to bridge {}", pair.local, WEAVE_BRIDGE);
        let attached = bounded(&op, self.timeout, self.wiring.attach(&pair.local, WEAVE_BRIDGE))
            .await
            .and_then(|res| res.map_err(PluginError::from));
        if let Err(e) = attached {
            self.remove_pair(&pair).await;
            return Err(e);
        }

        let static_routes = self.nameserver().map(|ns| {
            let len = if ns.is_ipv4() { 32 } else { 128 };
            vec![StaticRoute {
                destination: format!("{ns}/{len}"),
                route_type: ROUTE_CONNECTED,
                next_hop: String::new(),
            }]
        });

        info!(
            "[Driver]: Join endpoint {}:{} to {}",
            network_id, endpoint_id, sandbox_key
        );
        Ok(JoinResponse {
            interface_name: InterfaceName {
                src_name: pair.peer,
                dst_prefix: DST_PREFIX.to_string(),
            },
            static_routes,
        })
    }

    /// Delete the endpoint's veth pair. Failures are logged only.
    pub async fn leave(&self, network_id: &str, endpoint_id: &str) {
        if endpoint_id.is_empty() {
            warn!("[Driver]: Leave {} without endpoint id, nothing to delete", network_id);
            return;
        }

        let pair = VethPair::for_endpoint(endpoint_id, self.naming);
        self.remove_pair(&pair).await;

        info!("[Driver]: Leave {}:{}", network_id, endpoint_id);
    }

    async fn remove_pair(&self, pair: &VethPair) {
        let op = format!("delete veth pair {}", pair.local);
        match bounded(&op, self.timeout, self.wiring.delete_pair(pair)).await {
            Ok(Ok(())) => debug!("[Driver]: Deleted veth pair {}", pair.local),
            Ok(Err(e)) => warn!("[Driver]: Unable to delete veth: {e}"),
            Err(e) => warn!("[Driver]: Unable to delete veth: {e}"),
        }
    }
}
