//! Registration API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /webhooks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWebhookRequest {
    /// Human key, unique per owner. Defaults to the query's operation name.
    #[serde(default)]
    pub key: Option<String>,
    /// Declarative subscription document.
    pub document: String,
    #[serde(default)]
    pub variables: Option<serde_json::Map<String, serde_json::Value>>,
    pub url: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Body of `POST /webhooks/delete`.
///
/// Deleting by `name` removes every webhook of the owner whose query has
/// that operation name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookSelector {
    Id(Uuid),
    Key(String),
    Name(String),
}

/// Body sent to a webhook URL during registration. The endpoint must answer
/// with the identical object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChallenge {
    pub challenge: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A saved webhook as returned to its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub id: Uuid,
    pub key: String,
    pub name: Option<String>,
    pub document: String,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub url: String,
    pub metadata: serde_json::Value,
    pub valid: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Response of `POST /webhooks/secret/rotate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretResponse {
    pub secret: String,
}

/// The request field a registration input error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputField {
    Document,
    Url,
}

impl std::fmt::Display for InputField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputField::Document => write!(f, "document"),
            InputField::Url => write!(f, "url"),
        }
    }
}

/// Structured input error returned by `POST /webhooks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputErrorResponse {
    pub field: InputField,
    pub message: String,
}
