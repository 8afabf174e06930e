use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header, StatusCode},
    response::IntoResponse,
};
use serde::{de::DeserializeOwned, Serialize};

use super::msg::ErrorResponse;

/// What a protocol handler answers. Domain failures travel as `Err` with a
/// success status; only a body that cannot be encoded becomes a 500.
#[derive(Debug)]
pub enum Response<T> {
    Object(T),
    Empty,
    Err(String),
}

impl<T: Serialize> IntoResponse for Response<T> {
    fn into_response(self) -> axum::response::Response {
        let encoded = match self {
            Response::Object(obj) => serde_json::to_vec(&obj),
            Response::Empty => Ok(b"{}".to_vec()),
            Response::Err(err) => {
                log::error!("[Driver]: {}", err);
                serde_json::to_vec(&ErrorResponse { err })
            }
        };

        match encoded {
            Ok(mut body) => {
                body.push(b'\n');
                ([(header::CONTENT_TYPE, "application/json")], body).into_response()
            }
            Err(e) => {
                log::error!("[Driver]: Could not JSON encode response: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Could not JSON encode response",
                )
                    .into_response()
            }
        }
    }
}

/// Transport-level client error carrying `msg` as plain text.
pub fn bad_request(msg: String) -> axum::response::Response {
    log::error!("[Driver]: {} {}", StatusCode::BAD_REQUEST.as_u16(), msg);
    (StatusCode::BAD_REQUEST, msg).into_response()
}

/// JSON request body, decoded whatever the declared content type is: the
/// runtime sends `application/vnd.docker.plugins.v1.2+json`.
#[derive(Debug)]
pub struct PluginJson<T>(pub T);

impl<T, S> FromRequest<S> for PluginJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = axum::response::Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;

        serde_json::from_slice(&bytes)
            .map(PluginJson)
            .map_err(|e| bad_request(format!("Unable to decode JSON payload: {e}")))
    }
}
