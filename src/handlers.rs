//! HTTP route table (§6): a small `axum::Router` wired through the auth middleware,
//! delegating every route to [`Proxy`].

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;

use crate::auth::{AuthGateway, auth_middleware};
use crate::error::ProxyError;
use crate::proxy::{LifecycleAction, Proxy};
use crate::types::AuthenticatedWallet;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<Proxy>,
    pub auth: Arc<AuthGateway>,
}

pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/api/sandbox", post(create_sandbox).get(list_sandboxes))
        .route("/api/sandbox/paginated", get(list_sandboxes))
        .route("/api/sandbox/{id}", get(get_sandbox).delete(lifecycle_delete))
        .route("/api/sandbox/{id}/start", post(lifecycle_start))
        .route("/api/sandbox/{id}/stop", post(lifecycle_stop))
        .route("/api/sandbox/{id}/archive", post(lifecycle_archive))
        .route("/api/sandbox/{id}/labels", put(update_labels))
        .route("/api/sandbox/{id}/{*rest}", post(passthrough))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), auth_middleware));

    Router::new().route("/healthz", get(healthz)).merge(authenticated).with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

async fn create_sandbox(
    State(state): State<AppState>,
    Extension(wallet): Extension<AuthenticatedWallet>,
    body: axum::body::Bytes,
) -> Result<Response, ProxyError> {
    let response = state.proxy.create_sandbox(&wallet.0, &body).await?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

async fn list_sandboxes(
    State(state): State<AppState>,
    Extension(wallet): Extension<AuthenticatedWallet>,
) -> Result<Response, ProxyError> {
    let response = state.proxy.list_sandboxes(&wallet.0).await?;
    Ok(Json(response).into_response())
}

async fn get_sandbox(
    State(state): State<AppState>,
    Extension(wallet): Extension<AuthenticatedWallet>,
    Path(id): Path<String>,
) -> Result<Response, ProxyError> {
    if state.proxy.is_forbidden(&format!("/api/sandbox/{id}")) {
        return Err(ProxyError::BlockedEndpoint);
    }
    let response = state.proxy.get_sandbox(&wallet.0, &id).await?;
    Ok(Json(response).into_response())
}

async fn lifecycle_start(
    state: State<AppState>,
    wallet: Extension<AuthenticatedWallet>,
    id: Path<String>,
) -> Result<Response, ProxyError> {
    lifecycle(state, wallet, id, LifecycleAction::Start).await
}

async fn lifecycle_stop(
    state: State<AppState>,
    wallet: Extension<AuthenticatedWallet>,
    id: Path<String>,
) -> Result<Response, ProxyError> {
    lifecycle(state, wallet, id, LifecycleAction::Stop).await
}

async fn lifecycle_delete(
    state: State<AppState>,
    wallet: Extension<AuthenticatedWallet>,
    id: Path<String>,
) -> Result<Response, ProxyError> {
    lifecycle(state, wallet, id, LifecycleAction::Delete).await
}

async fn lifecycle_archive(
    state: State<AppState>,
    wallet: Extension<AuthenticatedWallet>,
    id: Path<String>,
) -> Result<Response, ProxyError> {
    lifecycle(state, wallet, id, LifecycleAction::Archive).await
}

async fn lifecycle(
    State(state): State<AppState>,
    Extension(wallet): Extension<AuthenticatedWallet>,
    Path(id): Path<String>,
    action: LifecycleAction,
) -> Result<Response, ProxyError> {
    let response = state.proxy.lifecycle(&wallet.0, &id, action).await?;
    Ok(Json(response).into_response())
}

async fn update_labels(
    State(state): State<AppState>,
    Extension(wallet): Extension<AuthenticatedWallet>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Response, ProxyError> {
    let response = state.proxy.update_labels(&wallet.0, &id, &body).await?;
    Ok(Json(response).into_response())
}

/// Any other `/api/sandbox/:id/*` route: `autostop`/`autoarchive` are always blocked,
/// everything else is an owner-checked passthrough (§4.9).
async fn passthrough(
    State(state): State<AppState>,
    Extension(wallet): Extension<AuthenticatedWallet>,
    Path((id, rest)): Path<(String, String)>,
) -> Result<Response, ProxyError> {
    let path = format!("/api/sandbox/{id}/{rest}");
    if state.proxy.is_forbidden(&path) {
        return Err(ProxyError::BlockedEndpoint);
    }
    let (status, body) = state.proxy.passthrough(&wallet.0, &id, &path).await?;
    Ok((status, body).into_response())
}
