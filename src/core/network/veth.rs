use std::net::Ipv4Addr;

use clap::ValueEnum;
use sha2::{Digest, Sha256};

pub const LOCAL_PREFIX: &str = "vethwl";
pub const PEER_PREFIX: &str = "vethwg";

/// Bytes of endpoint id used by the prefix scheme.
const PREFIX_KEY_LEN: usize = 5;
/// Hex digits kept by the hashed scheme; prefix + key fits IFNAMSIZ - 1.
const HASHED_KEY_LEN: usize = 9;

/// MAC OUI bytes, locally administered.
const MAC_OUI: [u8; 2] = [0x7a, 0x42];

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VethNaming {
    /// First five bytes of the endpoint id, cut back to a char boundary.
    #[default]
    Prefix,
    /// Truncated SHA-256 of the whole endpoint id.
    Hashed,
}

/// Host-side (`local`) and sandbox-side (`peer`) names of an endpoint's veth
/// pair. Join and Leave recompute it from the endpoint id, nothing is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    pub local: String,
    pub peer: String,
}

impl VethPair {
    pub fn for_endpoint(endpoint_id: &str, naming: VethNaming) -> Self {
        let key = match naming {
            VethNaming::Prefix => {
                // Cut on a char boundary so the name stays within IFNAMSIZ.
                let mut end = endpoint_id.len().min(PREFIX_KEY_LEN);
                while !endpoint_id.is_char_boundary(end) {
                    end -= 1;
                }
                endpoint_id[..end].to_string()
            }
            VethNaming::Hashed => {
                let digest = Sha256::digest(endpoint_id.as_bytes());
                let mut key = hex::encode(digest);
                key.truncate(HASHED_KEY_LEN);
                key
            }
        };

        VethPair {
            local: format!("{LOCAL_PREFIX}{key}"),
            peer: format!("{PEER_PREFIX}{key}"),
        }
    }
}

/// Hardware address for an endpoint: the fixed OUI followed by the four
/// octets of its IPv4 address.
pub fn mac_for(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    let bytes = [MAC_OUI[0], MAC_OUI[1], a, b, c, d];

    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
