//! Registration API handlers.
//!
//! These endpoints are called by webhook owners and require the
//! `Hookline-Owner` and `Hookline-Owner-Token` headers.
//!
//! # Endpoints
//!
//! - `POST /webhooks`               – register or replace a webhook
//! - `GET  /webhooks`               – list the owner's webhooks
//! - `POST /webhooks/delete`        – delete by id, key or name
//! - `GET  /webhooks/secret`        – show the owner's signing secret
//! - `POST /webhooks/secret/rotate` – rotate the owner's signing secret

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use hookline_core::registration::RegistrationError;
use hookline_sdk::objects::{
    InputErrorResponse, InputField, RegisterWebhookRequest, SecretResponse, WebhookResponse,
    WebhookSelector,
};

use crate::api::extractors::OwnerAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks", post(register_webhook).get(list_webhooks))
        .route("/webhooks/delete", post(delete_webhooks))
        .route("/webhooks/secret", get(show_secret))
        .route("/webhooks/secret/rotate", post(rotate_secret))
}

/// `POST /webhooks`: validate, verify and save a webhook.
async fn register_webhook(
    State(state): State<AppState>,
    OwnerAuth(owner_id): OwnerAuth,
    Json(payload): Json<RegisterWebhookRequest>,
) -> Result<impl IntoResponse, WebhookApiError> {
    let webhook = state.registrar.register(owner_id, payload).await?;
    Ok((StatusCode::CREATED, Json(WebhookResponse::from(&webhook))))
}

/// `GET /webhooks`: the requesting owner's webhooks only.
async fn list_webhooks(
    State(state): State<AppState>,
    OwnerAuth(owner_id): OwnerAuth,
) -> Result<impl IntoResponse, WebhookApiError> {
    let webhooks = state.registrar.list(owner_id).await?;
    Ok(Json(webhooks.iter().map(WebhookResponse::from).collect::<Vec<_>>()))
}

/// `POST /webhooks/delete`: returns the deleted webhooks.
async fn delete_webhooks(
    State(state): State<AppState>,
    OwnerAuth(owner_id): OwnerAuth,
    Json(selector): Json<WebhookSelector>,
) -> Result<impl IntoResponse, WebhookApiError> {
    let deleted = state.registrar.delete(owner_id, &selector).await?;
    Ok(Json(deleted.iter().map(WebhookResponse::from).collect::<Vec<_>>()))
}

async fn show_secret(
    State(state): State<AppState>,
    OwnerAuth(owner_id): OwnerAuth,
) -> Result<impl IntoResponse, WebhookApiError> {
    let secret = state.registrar.secret(owner_id).await?;
    Ok(Json(SecretResponse { secret }))
}

/// `POST /webhooks/secret/rotate`: one secret covers all of the owner's webhooks.
async fn rotate_secret(
    State(state): State<AppState>,
    OwnerAuth(owner_id): OwnerAuth,
) -> Result<impl IntoResponse, WebhookApiError> {
    let secret = state.registrar.rotate_secret(owner_id).await?;
    Ok(Json(SecretResponse { secret }))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum WebhookApiError {
    /// The request was rejected on one of its fields.
    Input { field: InputField, message: String },
    /// Persistence failed.
    Internal(String),
}

impl From<RegistrationError> for WebhookApiError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::Input { field, message } => Self::Input { field, message },
            RegistrationError::Store(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            WebhookApiError::Input { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(InputErrorResponse { field, message }),
            )
                .into_response(),
            WebhookApiError::Internal(e) => {
                tracing::error!(error = %e, "Registration API store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
