use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::http_server::errors::ApiError;
use crate::service_state::State;
use crate::storage::{Gun, MetaStore};

/// Remove a GUN's signer-rooted metadata. The alternate-rooted history is
/// retained; operators prune it out of band if needed.
pub async fn delete_gun(state: &State, gun: &Gun) -> Result<Response, ApiError> {
    tracing::info!(gun = %gun, "deleting trust data");
    state
        .signer_view()
        .delete(gun, None)
        .await
        .map_err(ApiError::from_storage)?;
    Ok(StatusCode::OK.into_response())
}
