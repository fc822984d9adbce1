//! Delivery envelope types.
//!
//! A delivery body is the query's result (or error) document with an
//! `extensions.webhook` block appended:
//!
//! ```json
//! {
//!   "data": { ... },
//!   "extensions": {
//!     "webhook": {
//!       "id": "...", "key": "...",
//!       "trigger": { "id": "...", "at": "2024-07-01T00:00:00Z" },
//!       "valid": true,
//!       "userMetadata": { ... }
//!     }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id shared by every payload produced from one batched change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub at: time::OffsetDateTime,
}

/// The `extensions.webhook` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookExtension {
    pub id: Uuid,
    pub key: String,
    pub trigger: TriggerInfo,
    /// `false` only on the last payload a webhook receives before it is
    /// disabled.
    pub valid: bool,
    pub user_metadata: serde_json::Value,
}

/// The `extensions` object of a delivery body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryExtensions {
    pub webhook: WebhookExtension,
}

/// A delivery body as seen by a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<DeliveryError>>,
    pub extensions: DeliveryExtensions,
}

/// One entry of the `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}
