use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

use common::crypto::CryptoError;

use crate::storage::{StorageError, SwizzleError};

/// Handler-level errors, mapped onto the stable error codes and status
/// codes content-trust clients expect.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("metadata not found")]
    MetadataNotFound { detail: Option<String> },

    #[error("invalid GUN: {0}")]
    InvalidGun(String),

    #[error("a newer or equal version of metadata already exists")]
    OldVersion,

    #[error("invalid metadata: {0}")]
    InvalidUpdate(String),

    #[error("attempting to overwrite reserved delegation: {0}")]
    ReservedDelegation(String),

    #[error("store misdirected: {0}")]
    WrongStoreDirection(&'static str),

    #[error("no storage backend available: {0}")]
    NoStorage(String),

    #[error("signing backend unavailable: {0}")]
    Crypto(#[from] CryptoError),
}

impl ApiError {
    fn code(&self) -> (&'static str, StatusCode) {
        match self {
            ApiError::MetadataNotFound { .. } => ("METADATA_NOT_FOUND", StatusCode::NOT_FOUND),
            ApiError::InvalidGun(_) => ("INVALID_GUN", StatusCode::BAD_REQUEST),
            ApiError::OldVersion => ("OLD_VERSION", StatusCode::BAD_REQUEST),
            ApiError::InvalidUpdate(_) => ("MALFORMED_UPLOAD", StatusCode::BAD_REQUEST),
            ApiError::ReservedDelegation(_) => ("RESERVED_DELEGATION", StatusCode::BAD_REQUEST),
            ApiError::WrongStoreDirection(_) => ("INVALID_OPERATION", StatusCode::BAD_REQUEST),
            ApiError::NoStorage(_) => ("NO_STORAGE", StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::Crypto(_) => ("NO_CRYPTO", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Lookup failures become 404s; infrastructure failures become 500s.
    pub fn from_lookup(err: StorageError) -> ApiError {
        match err {
            StorageError::NotFound { gun, role } => ApiError::MetadataNotFound {
                detail: Some(format!("{gun} {role}")),
            },
            other => ApiError::from_storage(other),
        }
    }

    pub fn from_storage(err: StorageError) -> ApiError {
        match err {
            StorageError::NotFound { gun, role } => ApiError::MetadataNotFound {
                detail: Some(format!("{gun} {role}")),
            },
            StorageError::OldVersion { .. } => ApiError::OldVersion,
            StorageError::ReadOnly => ApiError::WrongStoreDirection("read only"),
            StorageError::WriteOnly => ApiError::WrongStoreDirection("write only"),
            StorageError::Swizzle(SwizzleError::ReservedDelegation(role)) => {
                ApiError::ReservedDelegation(role.to_string())
            }
            StorageError::Swizzle(err) => ApiError::InvalidUpdate(err.to_string()),
            StorageError::Database(err) => ApiError::NoStorage(err.to_string()),
            StorageError::Backend(err) => ApiError::NoStorage(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = self.code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        } else {
            tracing::debug!(code, error = %self, "request rejected");
        }
        let detail = match &self {
            ApiError::MetadataNotFound { detail } => detail.clone().unwrap_or_default(),
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "errors": [{
                "code": code,
                "message": self.to_string(),
                "detail": detail,
            }]
        });
        (status, Json(body)).into_response()
    }
}
