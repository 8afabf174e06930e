use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};

use super::{VethPair, Wiring};
use crate::core::error::WiringError;

/// [`Wiring`] over rtnetlink. Every call opens its own netlink connection.
pub struct NetlinkWiring {}

#[async_trait]
impl Wiring for NetlinkWiring {
    async fn create_pair(&self, pair: &VethPair) -> Result<(), WiringError> {
        let vethcreate = |e: &dyn std::fmt::Display| WiringError::VethCreate {
            name: pair.local.clone(),
            reason: e.to_string(),
        };

        let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| vethcreate(&e))?;
        tokio::spawn(connection);

        handle
            .link()
            .add()
            .veth(pair.local.clone(), pair.peer.clone())
            .execute()
            .await
            .map_err(|e| vethcreate(&e))
    }

    async fn attach(&self, iface: &str, bridge: &str) -> Result<(), WiringError> {
        let linkup = |e: &dyn std::fmt::Display| WiringError::LinkUp {
            name: iface.to_string(),
            reason: e.to_string(),
        };

        let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| linkup(&e))?;
        tokio::spawn(connection);

        let bridge_link = match get_link_by_name(bridge, &handle).await {
            Ok(link) => link,
            Err(e) => {
                log::error!("[Wiring]: Lookup of bridge {} failed: {e}", bridge);
                return Err(WiringError::BridgeMissing {
                    bridge: bridge.to_string(),
                });
            }
        };

        if !is_bridge(&bridge_link) {
            log::error!("[Wiring]: {} is {:?}", bridge, bridge_link.attributes);
            return Err(WiringError::NotABridge {
                bridge: bridge.to_string(),
            });
        }

        let iface_link = get_link_by_name(iface, &handle)
            .await
            .map_err(|e| linkup(&e))?;

        handle
            .link()
            .set(iface_link.header.index)
            .controller(bridge_link.header.index)
            .execute()
            .await
            .map_err(|e| linkup(&e))?;

        handle
            .link()
            .set(iface_link.header.index)
            .up()
            .execute()
            .await
            .map_err(|e| linkup(&e))
    }

    async fn delete_pair(&self, pair: &VethPair) -> Result<(), WiringError> {
        let vethdelete = |e: &dyn std::fmt::Display| WiringError::VethDelete {
            name: pair.local.clone(),
            reason: e.to_string(),
        };

        let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| vethdelete(&e))?;
        tokio::spawn(connection);

        // Removing one end of a veth pair takes the peer with it.
        let link = get_link_by_name(&pair.local, &handle)
            .await
            .map_err(|e| vethdelete(&e))?;

        handle
            .link()
            .del(link.header.index)
            .execute()
            .await
            .map_err(|e| vethdelete(&e))
    }
}

async fn get_link_by_name(name: &str, handle: &rtnetlink::Handle) -> anyhow::Result<LinkMessage> {
    handle
        .link()
        .get()
        .match_name(name.to_string())
        .execute()
        .try_next()
        .await?
        .ok_or(anyhow::anyhow!("Link {} not found", name))
}

fn is_bridge(link: &LinkMessage) -> bool {
    link.attributes.iter().any(|attr| match attr {
        LinkAttribute::LinkInfo(infos) => infos
            .iter()
            .any(|info| matches!(info, LinkInfo::Kind(InfoKind::Bridge))),
        _ => false,
    })
}
