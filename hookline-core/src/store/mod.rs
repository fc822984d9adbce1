//! Persistence seams for webhooks, owner secrets and channel bindings.
//!
//! Two implementations exist: [`MemoryStore`] for tests and single-process
//! runs, and [`PgStore`] backed by Postgres.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::channels::ChannelName;
use crate::entities::{UpsertWebhook, Webhook};
use async_trait::async_trait;
use hookline_sdk::objects::WebhookSelector;
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Binding saved for a webhook that does not exist
    #[error("webhook not found: {0}")]
    WebhookNotFound(Uuid),
}

/// Webhook records and per-owner signing secrets.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Webhook>, StoreError>;

    /// Fetch every existing webhook among `ids`, in no particular order.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Webhook>, StoreError>;

    /// Create the webhook, or replace the one with the same `(owner, key)`.
    /// The saved webhook is always `valid`.
    async fn upsert(&self, webhook: UpsertWebhook) -> Result<Webhook, StoreError>;

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Webhook>, StoreError>;

    /// Delete the owner's webhooks matching `selector`, returning them.
    async fn delete(
        &self,
        owner_id: Uuid,
        selector: &WebhookSelector,
    ) -> Result<Vec<Webhook>, StoreError>;

    /// Flip `valid` to false. Returns whether the webhook was valid before.
    async fn mark_invalid(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Flip `valid` back to true if it is false. Returns whether it changed.
    async fn restore_valid(&self, id: Uuid) -> Result<bool, StoreError>;

    /// The owner's signing secret, created on first use.
    async fn owner_secret(&self, owner_id: Uuid) -> Result<String, StoreError>;

    /// Replace the owner's signing secret and return the new one.
    async fn rotate_secret(&self, owner_id: Uuid) -> Result<String, StoreError>;
}

/// Per-webhook channel subscriptions.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Replace the webhook's channel set with `channels`, recorded under
    /// `version`, and garbage-collect channel entries left without observers.
    async fn save(
        &self,
        webhook: &Webhook,
        channels: &BTreeSet<ChannelName>,
        version: i32,
    ) -> Result<(), StoreError>;

    /// Ids of the webhooks bound to `channel`.
    async fn list_for_channel(&self, channel: &str) -> Result<Vec<Uuid>, StoreError>;

    async fn list_for_webhook(&self, webhook_id: Uuid)
    -> Result<BTreeSet<ChannelName>, StoreError>;

    /// Webhooks whose binding was computed under a version other than
    /// `current_version`, including webhooks with no binding yet.
    async fn get_stale(&self, current_version: i32) -> Result<Vec<Uuid>, StoreError>;

    /// Drop the webhook's binding and collect orphaned channel entries.
    async fn remove(&self, webhook_id: Uuid) -> Result<(), StoreError>;

    /// Every channel entry currently observed by at least one webhook.
    async fn list_channels(&self) -> Result<BTreeSet<ChannelName>, StoreError>;
}
