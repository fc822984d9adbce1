//! Event and job type definitions for the webhook pipeline.
//!
//! Jobs are serializable so they can be handed to a durable queue. A
//! delivery job carries only the webhook fields needed to
//! deliver, never the query document or its variables.

use crate::channels::ChannelName;
use crate::entities::webhooks::Webhook;
use hookline_sdk::objects::TriggerInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// A publish observed on the internal event bus.
///
/// `data` is shared by reference: publishing the same `Arc` on several
/// channels marks those publishes as one logical change.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub channel: ChannelName,
    pub data: Arc<serde_json::Value>,
}

/// Correlation id and timestamp for one moment of domain change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub at: time::OffsetDateTime,
}

impl Trigger {
    /// Create a fresh trigger stamped with the current time.
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            at: time::OffsetDateTime::now_utc(),
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Trigger> for TriggerInfo {
    fn from(value: Trigger) -> Self {
        TriggerInfo {
            id: value.id,
            at: value.at,
        }
    }
}

/// Job consumed by the webhook processor: one batched change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorJob {
    pub trigger: Trigger,
    /// Union of the concrete channel names the change was published on.
    pub channels: BTreeSet<ChannelName>,
    pub data: serde_json::Value,
}

/// Minimal webhook fields needed to deliver a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSummary {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub key: String,
    pub url: String,
    pub metadata: serde_json::Value,
}

impl From<&Webhook> for WebhookSummary {
    fn from(webhook: &Webhook) -> Self {
        Self {
            id: webhook.id,
            owner_id: webhook.owner_id,
            key: webhook.key.clone(),
            url: webhook.url.clone(),
            metadata: webhook.metadata.clone(),
        }
    }
}

/// Job consumed by the delivery worker: one payload for one webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub webhook: WebhookSummary,
    /// Result or error document produced by the webhook's query.
    pub payload: serde_json::Value,
    pub trigger: Trigger,
    /// Set on the last payload a webhook receives before being disabled.
    pub fatal: bool,
}
