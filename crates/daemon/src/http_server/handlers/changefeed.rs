use std::collections::HashMap;

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::http_server::errors::ApiError;
use crate::service_state::State;
use crate::storage::{Change, Gun, MetaStore};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Serialize)]
struct ChangefeedResponse {
    count: usize,
    records: Vec<Change>,
}

/// Page through the changefeed for one GUN.
pub async fn changefeed(
    state: &State,
    gun: &Gun,
    params: &HashMap<String, String>,
) -> Result<Response, ApiError> {
    let change_id = params.get("change_id").map(String::as_str).unwrap_or("0");
    let records = params
        .get("records")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);

    let records = state
        .multiplexer()
        .get_changes(change_id, records, gun.as_str())
        .await
        .map_err(ApiError::from_storage)?;
    Ok(Json(ChangefeedResponse {
        count: records.len(),
        records,
    })
    .into_response())
}
