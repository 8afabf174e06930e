use std::{future::Future, time::Duration};

use thiserror::Error;

/// Failures surfaced to the protocol caller as `{"Err": ...}` payloads, and
/// logged by the watcher. The display text is exactly what the caller sees.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("You get just one network, and you already made {network}")]
    AlreadyProvisioned { network: String },

    #[error("Network {network} not found")]
    NetworkNotFound { network: String },

    #[error("No such network {network}")]
    NoSuchNetwork { network: String },

    #[error("Invalid endpoint id \"{endpoint}\"")]
    InvalidEndpoint { endpoint: String },

    #[error("Unable to allocate IP for endpoint {endpoint}: {reason}")]
    AllocationFailed { endpoint: String, reason: String },

    #[error("cannot parse IP address \"{address}\"")]
    InvalidNameserver { address: String },

    #[error(transparent)]
    Wiring(#[from] WiringError),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

/// Failures of the host-side veth/bridge plumbing.
#[derive(Error, Debug)]
pub enum WiringError {
    #[error("could not create veth pair {name}: {reason}")]
    VethCreate { name: String, reason: String },

    #[error("bridge \"{bridge}\" not present")]
    BridgeMissing { bridge: String },

    #[error("device \"{bridge}\" not a bridge")]
    NotABridge { bridge: String },

    #[error("unable to bring veth {name} up: {reason}")]
    LinkUp { name: String, reason: String },

    #[error("could not delete veth pair {name}: {reason}")]
    VethDelete { name: String, reason: String },
}

impl PluginError {
    pub fn allocation_failed(endpoint: &str, reason: impl ToString) -> Self {
        PluginError::AllocationFailed {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn timeout(operation: &str, after: Duration) -> Self {
        PluginError::Timeout {
            operation: operation.to_string(),
            after,
        }
    }
}

/// Runs `fut` under a deadline. The inner output is handed back untouched so
/// callers keep their own error handling; only an elapsed deadline is mapped.
pub async fn bounded<F: Future>(
    operation: &str,
    limit: Duration,
    fut: F,
) -> Result<F::Output, PluginError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| PluginError::timeout(operation, limit))
}
