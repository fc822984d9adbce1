//! Admin API handlers.
//!
//! These endpoints require the `Hookline-Admin-Authorization` header with
//! the plaintext admin secret.
//!
//! # Endpoints
//!
//! - `POST /admin/events`           – publish a domain event on the bus
//! - `POST /admin/channels/migrate` – recompute stale channel bindings

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use hookline_core::processors::MigrationError;
use hookline_sdk::objects::admin::{MigrationReportResponse, PublishEventRequest};
use std::sync::Arc;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/events", post(publish_event))
        .route("/admin/channels/migrate", post(migrate_channels))
}

/// `POST /admin/events`: hand an event to the pipeline. Processing is
/// asynchronous, the response only confirms the publish.
async fn publish_event(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(payload): Json<PublishEventRequest>,
) -> impl IntoResponse {
    tracing::debug!(channel = %payload.channel, "Admin published event");
    state.bus.publish(payload.channel, Arc::new(payload.data));
    StatusCode::ACCEPTED
}

async fn migrate_channels(
    State(state): State<AppState>,
    _auth: AdminAuth,
) -> Result<impl IntoResponse, AdminApiError> {
    let report = state.migration.run().await?;
    Ok(Json(MigrationReportResponse {
        version: report.version,
        migrated: report.migrated,
        invalidated: report.invalidated,
    }))
}

#[derive(Debug)]
pub(crate) struct AdminApiError(MigrationError);

impl From<MigrationError> for AdminApiError {
    fn from(err: MigrationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self.0, "Channel migration failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
    }
}
