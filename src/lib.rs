mod core;

pub use crate::core::{daemon, serve, DaemonArgs, Driver, Watcher, SOCKET_PATH};

// Collaborator seams and wire types, re-exported for integration tests and
// alternative backends.
pub use crate::core::{
    is_subdomain, mac_for, router, Allocator, ContainerEvent, ContainerInfo, EventStream,
    PluginError, Registrar, Runtime, VethNaming, VethPair, Wiring, WiringError, WEAVE_BRIDGE,
    WEAVE_DOMAIN,
};
