use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};

use common::tuf::RoleName;

use crate::auth::Identity;
use crate::http_server::cache::http_date;
use crate::http_server::errors::ApiError;
use crate::service_state::State;
use crate::storage::{Gun, MetaStore};

/// The channel view an identity reads from.
pub fn view_for(state: &State, identity: Identity) -> Arc<dyn MetaStore> {
    match identity {
        Identity::Signer => state.signer_view(),
        Identity::Alternate => state.alternate_view(),
        Identity::Admin => state.root_view(),
    }
}

fn metadata_response(data: Vec<u8>, cache_control: String, last_modified: Option<String>) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, cache_control);
    if let Some(last_modified) = last_modified {
        builder = builder.header(header::LAST_MODIFIED, last_modified);
    }
    builder
        .body(axum::body::Body::from(data))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Serve the current metadata for a role from the identity's channel.
pub async fn get_current(
    state: &State,
    identity: Identity,
    gun: &Gun,
    role: &RoleName,
) -> Result<Response, ApiError> {
    let view = view_for(state, identity);
    let (created_at, data) = view
        .get_current(gun, role, None)
        .await
        .map_err(ApiError::from_lookup)?;
    Ok(metadata_response(
        data,
        state.cache().current_header(),
        Some(http_date(created_at)),
    ))
}

/// Serve checksum-addressed metadata; immutable under its address.
pub async fn get_checksum(
    state: &State,
    identity: Identity,
    gun: &Gun,
    role: &RoleName,
    checksum: &str,
) -> Result<Response, ApiError> {
    let view = view_for(state, identity);
    let (created_at, data) = view
        .get_checksum(gun, role, checksum, None)
        .await
        .map_err(ApiError::from_lookup)?;
    Ok(metadata_response(
        data,
        state.cache().consistent_header(),
        Some(http_date(created_at)),
    ))
}

/// Serve version-addressed metadata; immutable under its address.
pub async fn get_version(
    state: &State,
    identity: Identity,
    gun: &Gun,
    role: &RoleName,
    version: i64,
) -> Result<Response, ApiError> {
    let view = view_for(state, identity);
    let (created_at, data) = view
        .get_version(gun, role, version, None)
        .await
        .map_err(ApiError::from_lookup)?;
    Ok(metadata_response(
        data,
        state.cache().consistent_header(),
        Some(http_date(created_at)),
    ))
}
