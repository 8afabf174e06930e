use std::sync::Arc;

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    routing::{get, post},
    Router,
};
use log::{debug, info, warn};

use super::{Driver, METHOD_RECEIVER};
use crate::core::{
    error::PluginError,
    msg::{
        CapabilitiesResponse, CreateEndpointRequest, CreateEndpointResponse,
        CreateNetworkRequest, DeleteEndpointRequest, DeleteNetworkRequest, EndpointInfoRequest,
        EndpointInfoResponse, HandshakeResponse, JoinRequest, JoinResponse, LeaveRequest,
    },
    response::{PluginJson, Response},
};

/// HTTP surface of the plugin: `/status`, `/Plugin.Activate` and one
/// `POST /NetworkDriver.<Method>` route per protocol verb.
pub fn router(driver: Arc<Driver>) -> Router {
    let method = |name: &str| format!("/{METHOD_RECEIVER}.{name}");

    Router::new()
        .route("/status", get(status))
        .route("/Plugin.Activate", post(handshake))
        .route(&method("GetCapabilities"), post(get_capabilities))
        .route(&method("CreateNetwork"), post(create_network))
        .route(&method("DeleteNetwork"), post(delete_network))
        .route(&method("CreateEndpoint"), post(create_endpoint))
        .route(&method("DeleteEndpoint"), post(delete_endpoint))
        .route(&method("EndpointOperInfo"), post(endpoint_info))
        .route(&method("Join"), post(join))
        .route(&method("Leave"), post(leave))
        .fallback(not_found)
        .with_state(driver)
}

impl<T> From<Result<T, PluginError>> for Response<T> {
    fn from(res: Result<T, PluginError>) -> Self {
        match res {
            Ok(obj) => Response::Object(obj),
            Err(e) => Response::Err(e.to_string()),
        }
    }
}

async fn not_found(method: Method, uri: Uri) -> (StatusCode, &'static str) {
    warn!("[Driver]: Not found: {} {}", method, uri);
    (StatusCode::NOT_FOUND, "404 page not found\n")
}

async fn status(State(driver): State<Arc<Driver>>) -> String {
    format!("weave plugin {}\n", driver.version())
}

async fn handshake(State(driver): State<Arc<Driver>>) -> Response<HandshakeResponse> {
    let resp = driver.handshake();
    info!("[Driver]: Handshake completed");
    Response::Object(resp)
}

async fn get_capabilities(State(driver): State<Arc<Driver>>) -> Response<CapabilitiesResponse> {
    let caps = driver.capabilities();
    debug!("[Driver]: Get capabilities: responded with {:?}", caps);
    Response::Object(caps)
}

async fn create_network(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<CreateNetworkRequest>,
) -> Response<()> {
    debug!("[Driver]: Create network request {:?}", req);
    match driver.create_network(&req.network_id).await {
        Ok(()) => Response::Empty,
        Err(e) => Response::Err(e.to_string()),
    }
}

async fn delete_network(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<DeleteNetworkRequest>,
) -> Response<()> {
    debug!("[Driver]: Delete network request {:?}", req);
    match driver.delete_network(&req.network_id).await {
        Ok(()) => Response::Empty,
        Err(e) => Response::Err(e.to_string()),
    }
}

async fn create_endpoint(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<CreateEndpointRequest>,
) -> Response<CreateEndpointResponse> {
    debug!("[Driver]: Create endpoint request {:?}", req);
    driver
        .create_endpoint(&req.network_id, &req.endpoint_id)
        .await
        .map(|interface| CreateEndpointResponse { interface })
        .into()
}

/// Answers at once; the address is released on a background task.
async fn delete_endpoint(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<DeleteEndpointRequest>,
) -> Response<()> {
    debug!("[Driver]: Delete endpoint request {:?}", req);
    driver.spawn_release(req.endpoint_id).await;
    Response::Empty
}

async fn endpoint_info(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<EndpointInfoRequest>,
) -> Response<EndpointInfoResponse> {
    debug!("[Driver]: Endpoint info request {:?}", req);
    Response::Object(driver.endpoint_info(&req.endpoint_id))
}

async fn join(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<JoinRequest>,
) -> Response<JoinResponse> {
    debug!("[Driver]: Join request {:?}", req);
    driver
        .join(&req.network_id, &req.endpoint_id, &req.sandbox_key)
        .await
        .into()
}

async fn leave(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<LeaveRequest>,
) -> Response<()> {
    debug!("[Driver]: Leave request {:?}", req);
    driver.leave(&req.network_id, &req.endpoint_id).await;
    Response::Empty
}
