//! Top-level error taxonomy for the billing sidecar.
//!
//! Request-facing errors implement [`axum::response::IntoResponse`] directly so handlers
//! can propagate them with `?`. Background-loop errors are logged and retried by their
//! owning task; they never reach a client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Errors surfaced by the auth gateway (§4.8). All map to 401.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing auth headers")]
    MissingHeaders,
    #[error("invalid encoding")]
    BadEncoding,
    #[error("invalid JSON")]
    BadJson,
    #[error("expired")]
    Expired,
    #[error("too far in future")]
    FutureWindowExceeded,
    #[error("invalid signature")]
    BadSignature,
    #[error("nonce already used")]
    ReplayedNonce,
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Errors surfaced by the proxy + ownership layer (§4.9).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("caller is not the sandbox owner")]
    NotOwner,
    #[error("endpoint is reserved for the billing system")]
    BlockedEndpoint,
    #[error("payment required")]
    InsufficientFunds,
    #[error("provisioning backend unreachable: {0}")]
    BackendUnreachable(#[from] crate::provisioning_client::ProvisioningError),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("malformed request body: {0}")]
    BadBody(String),
    /// A non-2xx response the provisioning backend itself returned (as opposed to a
    /// transport failure): forwarded to the caller verbatim rather than folded into a
    /// generic 502, matching the forwarded-status treatment `passthrough` already gives
    /// every other route (§7: 502 is reserved for list/get).
    #[error("upstream returned {status}")]
    Upstream { status: StatusCode, body: String },
}

impl ProxyError {
    /// Maps a provisioning-backend error for routes that must forward the backend's own
    /// status code instead of collapsing it to 502 (create, lifecycle, label updates).
    pub(crate) fn from_upstream(err: crate::provisioning_client::ProvisioningError) -> Self {
        match err {
            crate::provisioning_client::ProvisioningError::HttpStatus { status, body } => {
                ProxyError::Upstream { status, body }
            }
            other => ProxyError::BackendUnreachable(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorBody { error: &self.to_string() })).into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Upstream { status, body } => (status, body).into_response(),
            other => {
                let status = match &other {
                    ProxyError::Auth(inner) => inner.status(),
                    ProxyError::NotOwner => StatusCode::FORBIDDEN,
                    ProxyError::BlockedEndpoint => StatusCode::FORBIDDEN,
                    ProxyError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
                    ProxyError::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
                    ProxyError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    ProxyError::BadBody(_) => StatusCode::BAD_REQUEST,
                    ProxyError::Upstream { .. } => unreachable!(),
                };
                (status, Json(ErrorBody { error: &other.to_string() })).into_response()
            }
        }
    }
}
