use std::{path::PathBuf, time::Duration};

use clap::Parser;

use super::{network::VethNaming, SOCKET_PATH};

#[derive(Parser, Debug, Clone)]
#[command(name = "weave-netplugin")]
#[command(about = "Docker remote network driver backed by the weave router.")]
pub struct DaemonArgs {
    /// Unix socket to serve the plugin protocol on.
    #[arg(long, default_value = SOCKET_PATH)]
    pub socket: PathBuf,

    /// DNS server containers get a direct route to on join.
    #[arg(long)]
    pub nameserver: Option<String>,

    /// Docker daemon socket, e.g. unix:///var/run/docker.sock.
    #[arg(long)]
    pub docker_host: Option<String>,

    /// Base URL of the weave router's HTTP API. Looked up from the `weave`
    /// container when absent.
    #[arg(long)]
    pub ipam_url: Option<String>,

    /// Base URL of weaveDNS. Looked up from the `weavedns` container when
    /// absent.
    #[arg(long)]
    pub dns_url: Option<String>,

    /// Bound on every call to docker, the router, weaveDNS or netlink.
    #[arg(long, default_value = "10s", value_parser(parse_duration))]
    pub timeout: Duration,

    /// How veth names are derived from endpoint ids.
    #[arg(long, value_enum, default_value_t = VethNaming::Prefix)]
    pub veth_naming: VethNaming,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Parse a duration such as `500ms`, `10s`, `2m` or a bare number of seconds.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim().to_lowercase();

    let (number, millis_per_unit): (&str, u64) = if let Some(n) = input.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = input.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = input.strip_suffix('m') {
        (n, 60 * 1000)
    } else if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        (input.as_str(), 1000) // default is seconds
    } else {
        return Err("Invalid duration".into());
    };

    let number: u64 = match number.trim().parse() {
        Ok(n) => n,
        Err(e) => return Err(e.to_string()),
    };
    if number == 0 {
        return Err("Duration must be positive".into());
    }

    let millis = number
        .checked_mul(millis_per_unit)
        .ok_or("Duration too large")?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
#[path = "cmd_test.rs"]
mod tests;
