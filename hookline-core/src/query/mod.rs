//! Contract for the declarative query engine.
//!
//! The pipeline never interprets subscription documents itself. It hands a
//! document to a [`QueryExecutor`] together with an [`ObservationTransport`]
//! that decides what "observing a channel" means for this run: live data
//! for delivery, or recording-only for channel discovery.
//!
//! Failures come in two classes that must never be conflated:
//! [`PreparationError`] means the document can not run at all and disables
//! the webhook; [`EmissionError`] fails a single emitted item and leaves the
//! webhook enabled. [`QueryFailure`] carries that distinction downstream.

pub mod json;
pub mod transport;

pub use json::JsonQueryExecutor;
pub use transport::{DiscoveryTransport, LiveTransport};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Authorization scope a query is evaluated under. Webhook queries always run
/// as their owner, never as whoever triggered the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub owner_id: Uuid,
}

/// Static facts about a document, available without executing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationInfo {
    /// Operation name, used as the default webhook key.
    pub name: Option<String>,
}

/// The observation primitive used by an executing query.
pub trait ObservationTransport: Send + Sync {
    /// Stream the data published on `channel` for this execution.
    fn observe(&self, channel: &str) -> BoxStream<'static, Value>;
}

/// One execution of a document.
#[derive(Clone)]
pub struct ExecutionRequest {
    pub document: String,
    pub variables: Value,
    pub viewer: Viewer,
    pub transport: Arc<dyn ObservationTransport>,
}

/// Items emitted by a running query.
pub type ResultStream = BoxStream<'static, Result<Value, EmissionError>>;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Parse and validate `document` without executing it.
    async fn describe(
        &self,
        document: &str,
        variables: &Value,
    ) -> Result<OperationInfo, PreparationError>;

    /// Prepare and start the query. The returned stream ends once every
    /// observation the query made has completed.
    async fn execute(&self, request: ExecutionRequest) -> Result<ResultStream, PreparationError>;
}

/// The document can not be executed. Disables the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreparationError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("only subscription operations can be used as webhooks, got {0:?}")]
    NotSubscription(String),

    #[error("variable ${0} is required but was not provided")]
    MissingVariable(String),

    #[error("invalid document: {0}")]
    Invalid(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl PreparationError {
    /// Machine-readable code placed in the error payload's extensions.
    pub fn code(&self) -> &'static str {
        match self {
            PreparationError::Syntax(_) => "SYNTAX_ERROR",
            PreparationError::NotSubscription(_) => "NOT_SUBSCRIPTION",
            PreparationError::MissingVariable(_) => "MISSING_VARIABLE",
            PreparationError::Invalid(_) => "INVALID_DOCUMENT",
            PreparationError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }
}

/// A single emitted item failed. The webhook stays enabled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EmissionError {
    pub message: String,
    pub code: &'static str,
}

impl EmissionError {
    pub fn new(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

/// A query failure classified for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFailure {
    /// Preparation failed: the webhook is disabled and this is its last payload.
    Fatal(PreparationError),
    /// One emission failed: the webhook keeps receiving events.
    Emission(EmissionError),
}

impl QueryFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueryFailure::Fatal(_))
    }

    /// Error document delivered in place of a result.
    pub fn payload(&self) -> Value {
        let (message, code) = match self {
            QueryFailure::Fatal(e) => (e.to_string(), e.code()),
            QueryFailure::Emission(e) => (e.message.clone(), e.code),
        };
        json!({
            "errors": [{
                "message": message,
                "extensions": { "code": code },
            }]
        })
    }
}

impl From<PreparationError> for QueryFailure {
    fn from(value: PreparationError) -> Self {
        QueryFailure::Fatal(value)
    }
}

impl From<EmissionError> for QueryFailure {
    fn from(value: EmissionError) -> Self {
        QueryFailure::Emission(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_payload_carries_code() {
        let fatal = QueryFailure::from(PreparationError::MissingVariable("id".into()));
        assert!(fatal.is_fatal());
        assert_eq!(
            fatal.payload(),
            json!({
                "errors": [{
                    "message": "variable $id is required but was not provided",
                    "extensions": { "code": "MISSING_VARIABLE" },
                }]
            })
        );

        let emission = QueryFailure::from(EmissionError::new("boom", "EMISSION_FAILED"));
        assert!(!emission.is_fatal());
        assert_eq!(emission.payload()["errors"][0]["message"], "boom");
    }
}
