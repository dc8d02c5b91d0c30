use std::collections::HashMap;

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::value::RawValue;

use common::tuf::{RoleName, Signed};

use crate::auth::Identity;
use crate::http_server::errors::ApiError;
use crate::service_state::State;
use crate::storage::{set_channels, Gun, MetaStore, MetaUpdate, ROOT};

/// Atomic publish: the JSON body maps role names to signed metadata
/// envelopes. Admin identities write straight into the organizational
/// root's channel; everyone else goes through the dual-write multiplexer.
pub async fn publish(
    state: &State,
    identity: Identity,
    gun: &Gun,
    body: &[u8],
) -> Result<Response, ApiError> {
    let files: HashMap<String, Box<RawValue>> = serde_json::from_slice(body)
        .map_err(|err| ApiError::InvalidUpdate(format!("request body: {err}")))?;
    if files.is_empty() {
        return Err(ApiError::InvalidUpdate("no metadata submitted".to_string()));
    }

    let mut updates = Vec::with_capacity(files.len());
    for (role, envelope) in files {
        let data = envelope.get().as_bytes().to_vec();
        let parsed = Signed::from_slice(&data)
            .map_err(|err| ApiError::InvalidUpdate(format!("{role}: {err}")))?;
        let version = parsed
            .version()
            .map_err(|err| ApiError::InvalidUpdate(format!("{role}: {err}")))?;
        if version < 1 {
            return Err(ApiError::InvalidUpdate(format!(
                "{role}: version must be at least 1"
            )));
        }
        updates.push(MetaUpdate::new(RoleName::from(role), version, data));
    }

    match identity {
        Identity::Admin => {
            tracing::info!(gun = %gun, "admin publish, updating the shared root");
            let updates = set_channels(updates, ROOT);
            state
                .root_view()
                .update_many(gun, updates)
                .await
                .map_err(ApiError::from_storage)?;
        }
        _ => {
            state
                .multiplexer()
                .update_many(gun, updates)
                .await
                .map_err(ApiError::from_storage)?;
        }
    }

    Ok(StatusCode::OK.into_response())
}
