//! Admin API request and response types.

use serde::{Deserialize, Serialize};

/// Body of `POST /admin/events`: publish a domain event on the internal bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEventRequest {
    pub channel: String,
    pub data: serde_json::Value,
}

/// Response of `POST /admin/channels/migrate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReportResponse {
    pub version: i32,
    pub migrated: u64,
    pub invalidated: u64,
}
