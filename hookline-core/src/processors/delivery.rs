//! DeliveryWorker.
//!
//! The DeliveryWorker is responsible for:
//! - Receiving [`DeliveryJob`]s from the delivery queue
//! - Appending the `extensions.webhook` block to the payload
//! - Signing the body with the owner's current secret on every attempt
//! - POSTing it to the webhook URL and classifying the response
//!
//! Retries and backoff belong to the queue: a failed attempt is returned as
//! an error and the job is re-run later with a fresh signature timestamp.

use crate::events::DeliveryJob;
use crate::queue::{Job, JobHandler};
use crate::store::{StoreError, WebhookStore};
use async_trait::async_trait;
use hookline_sdk::objects::WebhookExtension;
use hookline_sdk::signature::{REQUEST_ID_HEADER, SIGNATURE_HEADER, SignatureHeader};
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors that can occur during webhook delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Store error while looking up the owner's secret
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Consumer answered with a status >= 400
    #[error("webhook delivery failed with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Payload serialization error
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Build the outbound body: the payload plus `extensions.webhook`.
///
/// Other `extensions` entries already present in the payload are kept.
pub fn build_body(job: &DeliveryJob) -> Value {
    let extension = WebhookExtension {
        id: job.webhook.id,
        key: job.webhook.key.clone(),
        trigger: job.trigger.into(),
        valid: !job.fatal,
        user_metadata: job.webhook.metadata.clone(),
    };

    let mut body = match &job.payload {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other.clone());
            map
        }
    };
    let extensions = body
        .entry("extensions")
        .or_insert_with(|| Value::Object(Map::new()));
    if !extensions.is_object() {
        *extensions = Value::Object(Map::new());
    }
    if let Value::Object(extensions) = extensions {
        extensions.insert(
            "webhook".to_string(),
            serde_json::to_value(extension).unwrap_or(Value::Null),
        );
    }
    Value::Object(body)
}

pub struct DeliveryWorker {
    webhooks: Arc<dyn WebhookStore>,
    http_client: reqwest::Client,
}

impl DeliveryWorker {
    /// Create a new DeliveryWorker.
    ///
    /// Redirects are not followed: a 3xx answer already counts as delivered.
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            webhooks,
            http_client,
        })
    }

    /// Attempt one delivery of `job`.
    pub async fn deliver(&self, job: &Job<DeliveryJob>) -> Result<(), DeliveryError> {
        let delivery = &job.payload;
        let webhook_id = delivery.webhook.id;
        // Looked up per attempt so a rotated secret applies to pending retries.
        let secret = self.webhooks.owner_secret(delivery.webhook.owner_id).await?;
        let body = serde_json::to_string(&build_body(delivery))?;
        let signature = SignatureHeader::sign(&body, secret.as_bytes());

        let response = self
            .http_client
            .post(&delivery.webhook.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature.to_string())
            .header(REQUEST_ID_HEADER, job.id.to_string())
            .body(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                warn!(
                    webhook_id = %webhook_id,
                    job_id = %job.id,
                    attempt = job.attempt,
                    error = %e,
                    "Webhook endpoint unreachable"
                );
                return Err(e.into());
            }
            Err(e) => {
                error!(
                    webhook_id = %webhook_id,
                    job_id = %job.id,
                    attempt = job.attempt,
                    error = %e,
                    "Webhook request failed"
                );
                return Err(e.into());
            }
        };

        let status = response.status();
        if status.as_u16() < 400 {
            debug!(
                webhook_id = %webhook_id,
                job_id = %job.id,
                status = status.as_u16(),
                fatal = delivery.fatal,
                "Webhook delivered"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            webhook_id = %webhook_id,
            job_id = %job.id,
            attempt = job.attempt,
            status = status.as_u16(),
            "Webhook endpoint rejected delivery"
        );
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl JobHandler<DeliveryJob> for DeliveryWorker {
    type Error = DeliveryError;

    async fn handle(&self, job: &Job<DeliveryJob>) -> Result<(), DeliveryError> {
        self.deliver(job).await
    }
}
