use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::api_keys::codec::CryptoError;
use crate::datastore::StoreError;

/// Errors that can occur while operating on platform state
#[derive(Error, Debug)]
pub enum StateError {
    /// The request is missing or malforms a required field
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A create was attempted while an active credential already exists
    #[error("An active API key already exists for this account")]
    ActiveKeyExists,

    /// No principal matches the given identifier
    #[error("Account not found")]
    PrincipalNotFound,

    /// No credential matches the given identifier
    #[error("API key not found")]
    CredentialNotFound,

    /// Cryptographic failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Failure in the backing store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for StateError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(ref reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            Self::ActiveKeyExists => (
                StatusCode::CONFLICT,
                "An active API key already exists for this account".to_string(),
            ),
            Self::PrincipalNotFound => (StatusCode::NOT_FOUND, "Account not found".to_string()),
            Self::CredentialNotFound => (StatusCode::NOT_FOUND, "API key not found".to_string()),
            Self::Crypto(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            Self::Store(StoreError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Store temporarily unavailable, retry the request".to_string(),
            ),
            Self::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({ "error": message }));

        (status, body).into_response()
    }
}
