use std::{future::Future, path::Path, sync::Arc};

use anyhow::Context;
use log::{debug, info, warn};
use tokio::net::UnixListener;

mod cmd;
mod dns;
mod driver;
mod error;
mod msg;
mod network;
mod response;
mod runtime;
mod watcher;

pub use cmd::*;
pub use dns::{Registrar, WeaveDns, WEAVEDNS_HTTP_PORT};
pub use driver::{router, Driver};
pub use error::{PluginError, WiringError};
pub use msg::*;
pub use network::{
    mac_for, Allocator, NetlinkWiring, VethNaming, VethPair, WeaveIpam, Wiring, WEAVE_BRIDGE,
};
pub use runtime::{ContainerEvent, ContainerInfo, DockerRuntime, EventStream, Runtime, ServiceAddr};
pub use watcher::{is_subdomain, Watcher, WEAVE_DOMAIN};

pub const SOCKET_PATH: &str = "/run/docker/plugins/weave.sock";

/// Container running the weave router, home of the IPAM API.
pub const WEAVE_CONTAINER: &str = "weave";
/// Container running weaveDNS.
pub const WEAVEDNS_CONTAINER: &str = "weavedns";

/// Serve the plugin protocol on `socket` until `shutdown` resolves, then wait
/// for outstanding address releases. A stale socket file left by a previous
/// run is replaced.
pub async fn serve(
    driver: Arc<Driver>,
    socket: &Path,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    if socket.exists() {
        debug!("[Daemon]: Removing stale socket {}", socket.display());
        std::fs::remove_file(socket)?;
    }
    if let Some(parent_dir) = socket.parent() {
        std::fs::create_dir_all(parent_dir)?;
    }

    let listener = UnixListener::bind(socket)
        .with_context(|| format!("Failed to bind {}", socket.display()))?;

    info!(
        "[Daemon]: Daemon is running and listening on {}",
        socket.display()
    );

    axum::serve(listener, router(driver.clone()))
        .with_graceful_shutdown(shutdown)
        .await?;
    driver.drain_releases().await;

    info!("[Daemon]: Daemon is exiting");
    Ok(())
}

async fn run_daemon(args: DaemonArgs) -> anyhow::Result<()> {
    let docker = DockerRuntime::connect(args.docker_host.as_deref())
        .context("could not connect to docker")?;
    docker.ping().await.context("could not connect to docker")?;
    let runtime: Arc<dyn Runtime> = Arc::new(docker);

    let locate = |url: Option<String>, name: &str, port: u16| match url {
        Some(url) => ServiceAddr::Fixed(url),
        None => ServiceAddr::Container {
            name: name.to_string(),
            port,
            runtime: runtime.clone(),
        },
    };
    let router_addr = locate(args.ipam_url, WEAVE_CONTAINER, network::WEAVE_HTTP_PORT);
    let dns_addr = locate(args.dns_url, WEAVEDNS_CONTAINER, WEAVEDNS_HTTP_PORT);
    debug!("[Daemon]: Router at {:?}, weaveDNS at {:?}", router_addr, dns_addr);

    let watcher = Watcher::new(
        runtime.clone(),
        Arc::new(WeaveDns::new(dns_addr)),
        args.timeout,
    );

    let driver = Driver::new(
        watcher.clone(),
        Arc::new(WeaveIpam::new(router_addr)),
        Arc::new(NetlinkWiring {}),
    )
    .with_naming(args.veth_naming)
    .with_timeout(args.timeout);

    if let Some(nameserver) = &args.nameserver {
        driver.set_nameserver(nameserver)?;
    }

    let _events = watcher.start();

    serve(Arc::new(driver), &args.socket, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("[Daemon]: Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("[Daemon]: Shutdown signal received");
}

/// Run the plugin daemon to completion on a fresh multi-threaded runtime.
pub fn daemon(args: DaemonArgs) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_daemon(args))
}
