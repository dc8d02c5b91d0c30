//! HTTP surface: the trust-multiplexing router.
//!
//! Every `/v2/<gun>/_trust/...` request is authenticated, resolved to a
//! channel view by the caller's identity, and delegated to the matching
//! handler. The operator and admin listeners run the same router wired to
//! different access controllers.

mod cache;
mod errors;
pub mod handlers;
mod routes;

pub use cache::{CacheSettings, CACHE_MAX_AGE_LIMIT};
pub use errors::ApiError;
pub use routes::{parse as parse_trust_route, TrustRoute};

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{Path, Query, State as AxumState};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::auth::{Access, Identity};
use crate::service_state::State;

/// Run one listener until shutdown is signalled.
pub async fn run(
    listen_addr: SocketAddr,
    state: State,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let router = router(state);
    tracing::info!(addr = ?listen_addr, "trust server listening");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

/// The trust router over a prepared service state.
pub fn router(state: State) -> Router {
    Router::new()
        .route("/v2/", get(probe_handler))
        .route("/v2/*path", any(dispatch_handler))
        .fallback(not_found_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Auth probe: 200 when the caller is admitted, 401 challenge otherwise.
async fn probe_handler(AxumState(state): AxumState<State>, headers: HeaderMap) -> Response {
    match state.access().authorized(&headers, &[]).await {
        Ok(_) => (StatusCode::OK, axum::Json(serde_json::json!({}))).into_response(),
        Err(challenge) => challenge.into_response(),
    }
}

async fn not_found_handler() -> Response {
    ApiError::MetadataNotFound { detail: None }.into_response()
}

/// Single entry point for `/v2/<gun>/_trust/...`: parse, authenticate,
/// select the channel view, dispatch.
async fn dispatch_handler(
    AxumState(state): AxumState<State>,
    Path(path): Path<String>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(route) = routes::parse(&method, &path) else {
        return ApiError::MetadataNotFound { detail: None }.into_response();
    };

    let requested: Vec<Access> = route
        .required_scopes()
        .iter()
        .map(|scope| Access::repository(route.gun().as_str(), scope))
        .collect();
    let label = match state.access().authorized(&headers, &requested).await {
        Ok(label) => label,
        Err(challenge) => return challenge.into_response(),
    };

    if !state.gun_allowed(route.gun()) {
        return ApiError::InvalidGun(format!(
            "require GUNs with prefix: {:?}",
            state.gun_prefixes()
        ))
        .into_response();
    }

    // unknown identity labels are a lookup failure, not a server error
    let Some(identity) = Identity::from_label(&label) else {
        tracing::debug!(identity = %label, "invalid tuf root signer");
        return ApiError::MetadataNotFound {
            detail: Some(format!("invalid tuf root signer {label}")),
        }
        .into_response();
    };

    let result = match &route {
        TrustRoute::MetaCurrent { gun, role } => {
            handlers::get_current(&state, identity, gun, role).await
        }
        TrustRoute::MetaChecksum { gun, role, checksum } => {
            handlers::get_checksum(&state, identity, gun, role, checksum).await
        }
        TrustRoute::MetaVersion { gun, role, version } => {
            handlers::get_version(&state, identity, gun, role, *version).await
        }
        TrustRoute::Publish { gun } => handlers::publish(&state, identity, gun, &body).await,
        TrustRoute::GetKey { gun, role } => handlers::get_key(&state, gun, role).await,
        TrustRoute::RotateKey { gun, role } => handlers::rotate_key(&state, gun, role).await,
        TrustRoute::DeleteGun { gun } => handlers::delete_gun(&state, gun).await,
        TrustRoute::Changefeed { gun } => handlers::changefeed(&state, gun, &params).await,
    };

    match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
