use axum::response::{IntoResponse, Response};
use axum::Json;

use common::tuf::RoleName;

use crate::http_server::errors::ApiError;
use crate::service_state::State;
use crate::storage::Gun;

/// Serve the current public key for a GUN's snapshot or timestamp role,
/// creating one on first request.
pub async fn get_key(state: &State, gun: &Gun, role: &RoleName) -> Result<Response, ApiError> {
    let key = state.key_store().current(gun, role).await?;
    Ok(Json(key).into_response())
}

/// Replace the key for a GUN's snapshot or timestamp role.
pub async fn rotate_key(state: &State, gun: &Gun, role: &RoleName) -> Result<Response, ApiError> {
    tracing::info!(gun = %gun, role = %role, "rotating server-managed key");
    let key = state.key_store().rotate(gun, role).await?;
    Ok(Json(key).into_response())
}
