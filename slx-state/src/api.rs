//! HTTP surface over the state service. Thin handlers only: every
//! operation lives in the components, the routes just translate requests
//! and errors.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use slx_usage_events::{Method, UsageEvent};

use crate::accounts::{ExternalIdentity, Principal};
use crate::api_keys::{CredentialMetadata, KeyReveal, KeyStore};
use crate::billing::{CreditLedger, LedgerEntry, PlanTier};
use crate::datastore::StoreError;
use crate::error::StateError;
use crate::provision::AccountProvisioner;
use crate::usage::UsageRecorder;

/// Shared handler state: the four components over one injected store client
#[derive(Clone)]
pub struct AppState {
    pub provisioner: AccountProvisioner,
    pub keys: KeyStore,
    pub ledger: CreditLedger,
    pub recorder: UsageRecorder,
}

fn status_for(error: &StateError) -> StatusCode {
    match error {
        StateError::Validation(_) => StatusCode::BAD_REQUEST,
        StateError::ActiveKeyExists => StatusCode::CONFLICT,
        StateError::PrincipalNotFound | StateError::CredentialNotFound => StatusCode::NOT_FOUND,
        StateError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Response for the login-time sync
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncUserResponse {
    /// Success flag
    pub success: bool,

    /// The synced principal
    pub principal: Option<Principal>,

    /// Raw API key, present only when a credential was minted on this call
    pub api_key: Option<String>,

    /// Error message if the operation failed
    pub error: Option<String>,
}

/// Sync an external identity into a principal, provisioning on first login
pub async fn sync_user(
    State(state): State<Arc<AppState>>,
    Json(identity): Json<ExternalIdentity>,
) -> impl IntoResponse {
    match state.provisioner.bootstrap(&identity).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(SyncUserResponse {
                success: true,
                principal: Some(outcome.principal),
                api_key: outcome.minted_key.map(|k| k.secret),
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(SyncUserResponse {
                success: false,
                principal: None,
                api_key: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Display info for a stored credential
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyInfo {
    pub prefix: String,
    pub suffix: String,
    pub name: String,
    pub display_format: String,
}

impl From<&CredentialMetadata> for KeyInfo {
    fn from(metadata: &CredentialMetadata) -> Self {
        Self {
            prefix: metadata.key_prefix.clone(),
            suffix: metadata.key_suffix.clone(),
            name: metadata.label.clone(),
            display_format: metadata.display(),
        }
    }
}

/// Response for API key retrieval and regeneration
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    /// Success flag
    pub success: bool,

    /// Full raw key; on retrieval only when reversible storage is enabled,
    /// on regeneration always (shown exactly once)
    pub api_key: Option<String>,

    /// Display info for the credential
    pub key_info: Option<KeyInfo>,

    /// Guidance when the full key cannot be returned
    pub message: Option<String>,

    /// Error message if the operation failed
    pub error: Option<String>,
}

impl ApiKeyResponse {
    fn failure(error: &StateError) -> Self {
        Self {
            success: false,
            api_key: None,
            key_info: None,
            message: None,
            error: Some(error.to_string()),
        }
    }
}

/// Get the active API key for a principal.
///
/// Returns the decrypted key when envelope encryption is configured and the
/// stored blob authenticates; otherwise returns prefix/suffix display info
/// and a manual re-entry message.
pub async fn get_api_key(
    State(state): State<Arc<AppState>>,
    Path(principal_id): Path<String>,
) -> impl IntoResponse {
    match state.keys.reveal(&principal_id).await {
        Ok((metadata, KeyReveal::Secret(secret))) => (
            StatusCode::OK,
            Json(ApiKeyResponse {
                success: true,
                api_key: Some(secret),
                key_info: Some(KeyInfo::from(&metadata)),
                message: None,
                error: None,
            }),
        ),
        Ok((metadata, KeyReveal::NotRetrievable)) => (
            StatusCode::OK,
            Json(ApiKeyResponse {
                success: true,
                api_key: None,
                key_info: Some(KeyInfo::from(&metadata)),
                message: Some(
                    "API keys are stored as hashes for security. Enter your full key \
                     manually, or regenerate a new key if you have lost it."
                        .to_string(),
                ),
                error: None,
            }),
        ),
        Err(e) => (status_for(&e), Json(ApiKeyResponse::failure(&e))),
    }
}

/// Regenerate the active API key for a principal, returning the new raw
/// secret exactly once
pub async fn regenerate_api_key(
    State(state): State<Arc<AppState>>,
    Path(principal_id): Path<String>,
) -> impl IntoResponse {
    match state.keys.regenerate(&principal_id).await {
        Ok(minted) => (
            StatusCode::OK,
            Json(ApiKeyResponse {
                success: true,
                api_key: Some(minted.secret),
                key_info: Some(KeyInfo::from(&minted.metadata)),
                message: Some(
                    "Store this key now; it will not be shown again.".to_string(),
                ),
                error: None,
            }),
        ),
        Err(e) => (status_for(&e), Json(ApiKeyResponse::failure(&e))),
    }
}

/// Response for listing API keys
#[derive(Debug, Serialize, Deserialize)]
pub struct ListApiKeysResponse {
    /// Success flag
    pub success: bool,

    /// Metadata of all credentials, newest first; secrets are never listed
    pub api_keys: Vec<CredentialMetadata>,

    /// Total count
    pub total: usize,

    /// Error message if the operation failed
    pub error: Option<String>,
}

/// List all credentials of a principal, active and inactive
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Path(principal_id): Path<String>,
) -> impl IntoResponse {
    match state.keys.list(&principal_id).await {
        Ok(api_keys) => (
            StatusCode::OK,
            Json(ListApiKeysResponse {
                success: true,
                total: api_keys.len(),
                api_keys,
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(ListApiKeysResponse {
                success: false,
                api_keys: Vec::new(),
                total: 0,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Request for the current-period credit balance
#[derive(Debug, Serialize, Deserialize)]
pub struct GetCreditsRequest {
    pub principal_id: String,
}

/// Response carrying the current-period ledger row
#[derive(Debug, Serialize, Deserialize)]
pub struct CreditsResponse {
    /// Success flag
    pub success: bool,

    /// The principal's plan at row-creation time
    pub plan: Option<PlanTier>,

    /// The ledger row for the current period
    pub credits: Option<LedgerEntry>,

    /// Error message if the operation failed
    pub error: Option<String>,
}

/// Current-period credits for a principal, creating the row lazily on the
/// first read of a new period
pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GetCreditsRequest>,
) -> impl IntoResponse {
    if request.principal_id.is_empty() {
        let e = StateError::Validation("principal_id is required".to_string());
        return (
            status_for(&e),
            Json(CreditsResponse {
                success: false,
                plan: None,
                credits: None,
                error: Some(e.to_string()),
            }),
        );
    }

    match state
        .ledger
        .current_entry(&request.principal_id, chrono::Utc::now())
        .await
    {
        Ok(entry) => (
            StatusCode::OK,
            Json(CreditsResponse {
                success: true,
                plan: Some(entry.plan),
                credits: Some(entry),
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(CreditsResponse {
                success: false,
                plan: None,
                credits: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Request to record one API call
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackUsageRequest {
    pub principal_id: String,
    pub credential_id: Option<String>,
    /// Caller-supplied id for at-most-once accounting of retried
    /// submissions; generated when absent
    pub request_id: Option<String>,
    pub endpoint: String,
    pub method: Method,
    pub status_code: u16,
    pub latency_ms: u64,
    pub credits_charged: u64,
    pub error_text: Option<String>,
}

/// Response for usage tracking
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackUsageResponse {
    /// Success flag
    pub success: bool,

    /// Error message if the operation failed
    pub error: Option<String>,
}

/// Record a usage event and charge it to the current period
pub async fn track_usage(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TrackUsageRequest>,
) -> impl IntoResponse {
    let mut event = UsageEvent::new(
        request.principal_id,
        request.credential_id,
        request.endpoint,
        request.method,
        request.status_code,
        request.latency_ms,
        request.credits_charged,
        request.error_text,
    );
    if let Some(request_id) = request.request_id {
        event.request_id = request_id;
    }

    match state.recorder.record(event).await {
        Ok(()) => (
            StatusCode::OK,
            Json(TrackUsageResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(TrackUsageResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}

async fn pong() -> Json<&'static str> {
    Json("pong")
}

async fn health_check() -> Json<&'static str> {
    Json("healthy")
}

/// Build the service router
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(pong))
        .route("/health", get(health_check))
        .route("/auth/sync_user", post(sync_user))
        .route("/keys/:principal_id", get(get_api_key))
        .route("/keys/:principal_id/regenerate", post(regenerate_api_key))
        .route("/keys/:principal_id/list", get(list_api_keys))
        .route("/billing/credits", post(get_credits))
        .route("/usage/track", post(track_usage))
        .with_state(state)
}
