use async_trait::async_trait;
use ipnet::Ipv4Net;

use super::error::WiringError;

mod bridge;
mod ipam;
mod veth;

pub use bridge::NetlinkWiring;
pub use ipam::{WeaveIpam, WEAVE_HTTP_PORT};
pub use veth::{mac_for, VethNaming, VethPair};

/// Well-known bridge every endpoint's host side is attached to.
pub const WEAVE_BRIDGE: &str = "weave";

/// Per-endpoint address leases.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Allocator: Send + Sync {
    /// Lease an address for `endpoint_id`, returned with its prefix length.
    async fn allocate(&self, endpoint_id: &str) -> anyhow::Result<Ipv4Net>;

    async fn release(&self, endpoint_id: &str) -> anyhow::Result<()>;
}

/// Host network-device plumbing used by Join and Leave.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Wiring: Send + Sync {
    async fn create_pair(&self, pair: &VethPair) -> Result<(), WiringError>;

    /// Enslave `iface` to `bridge` and set it up. Fails with
    /// [`WiringError::BridgeMissing`] or [`WiringError::NotABridge`] when the
    /// bridge device is absent or of another kind.
    async fn attach(&self, iface: &str, bridge: &str) -> Result<(), WiringError>;

    async fn delete_pair(&self, pair: &VethPair) -> Result<(), WiringError>;
}
