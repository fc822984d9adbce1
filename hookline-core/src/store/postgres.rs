use super::{BindingStore, StoreError, WebhookStore};
use crate::channels::ChannelName;
use crate::entities::channel_bindings::{
    ChannelBinding, GetStaleWebhooks, ListChannels, ListChannelsForWebhook,
    ListWebhooksForChannel,
};
use crate::entities::owner_secrets::{GetOrCreateOwnerSecret, RotateOwnerSecret};
use crate::entities::webhooks::{
    DeleteWebhooks, GetWebhookById, GetWebhooksByIds, ListWebhooksByOwner, MarkWebhookInvalid,
    RestoreWebhookValid,
};
use crate::entities::{UpsertWebhook, Webhook};
use crate::framework::DatabaseProcessor;
use crate::utils::secret::random_hex_token;
use async_trait::async_trait;
use hookline_sdk::objects::WebhookSelector;
use kanau::processor::Processor;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Postgres-backed store. Binding changes run in one transaction each.
#[derive(Debug, Clone)]
pub struct PgStore {
    db: DatabaseProcessor,
}

impl PgStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WebhookStore for PgStore {
    async fn get(&self, id: Uuid) -> Result<Option<Webhook>, StoreError> {
        Ok(self.db.process(GetWebhookById { id }).await?)
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Webhook>, StoreError> {
        Ok(self
            .db
            .process(GetWebhooksByIds { ids: ids.to_vec() })
            .await?)
    }

    async fn upsert(&self, webhook: UpsertWebhook) -> Result<Webhook, StoreError> {
        Ok(self.db.process(webhook).await?)
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Webhook>, StoreError> {
        Ok(self.db.process(ListWebhooksByOwner { owner_id }).await?)
    }

    async fn delete(
        &self,
        owner_id: Uuid,
        selector: &WebhookSelector,
    ) -> Result<Vec<Webhook>, StoreError> {
        let deleted = self
            .db
            .process(DeleteWebhooks {
                owner_id,
                selector: selector.clone(),
            })
            .await?;
        if !deleted.is_empty() {
            // Bindings cascade with the webhook rows; channel entries do not.
            let mut tx = self.db.begin().await?;
            ChannelBinding::collect_orphans_tx(&mut tx).await?;
            tx.commit().await?;
        }
        Ok(deleted)
    }

    async fn mark_invalid(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.db.process(MarkWebhookInvalid { id }).await? > 0)
    }

    async fn restore_valid(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.db.process(RestoreWebhookValid { id }).await? > 0)
    }

    async fn owner_secret(&self, owner_id: Uuid) -> Result<String, StoreError> {
        Ok(self
            .db
            .process(GetOrCreateOwnerSecret {
                owner_id,
                candidate: random_hex_token(),
            })
            .await?)
    }

    async fn rotate_secret(&self, owner_id: Uuid) -> Result<String, StoreError> {
        Ok(self
            .db
            .process(RotateOwnerSecret {
                owner_id,
                secret: random_hex_token(),
            })
            .await?)
    }
}

#[async_trait]
impl BindingStore for PgStore {
    async fn save(
        &self,
        webhook: &Webhook,
        channels: &BTreeSet<ChannelName>,
        version: i32,
    ) -> Result<(), StoreError> {
        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let mut tx = self.db.begin().await?;
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM webhooks WHERE id = $1 FOR UPDATE")
                .bind(webhook.id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::WebhookNotFound(webhook.id));
        }
        let collected =
            ChannelBinding::replace_tx(&mut tx, webhook.id, webhook.owner_id, &channels, version)
                .await?;
        tx.commit().await?;
        tracing::debug!(
            webhook_id = %webhook.id,
            channels = channels.len(),
            collected,
            "Saved channel binding"
        );
        Ok(())
    }

    async fn list_for_channel(&self, channel: &str) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .db
            .process(ListWebhooksForChannel {
                channel: channel.to_string(),
            })
            .await?)
    }

    async fn list_for_webhook(
        &self,
        webhook_id: Uuid,
    ) -> Result<BTreeSet<ChannelName>, StoreError> {
        let channels = self
            .db
            .process(ListChannelsForWebhook { webhook_id })
            .await?;
        Ok(channels.into_iter().map(ChannelName::from).collect())
    }

    async fn get_stale(&self, current_version: i32) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.db.process(GetStaleWebhooks { current_version }).await?)
    }

    async fn remove(&self, webhook_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("SELECT id FROM webhooks WHERE id = $1 FOR UPDATE")
            .bind(webhook_id)
            .execute(&mut *tx)
            .await?;
        ChannelBinding::remove_tx(&mut tx, webhook_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_channels(&self) -> Result<BTreeSet<ChannelName>, StoreError> {
        let channels = self.db.process(ListChannels).await?;
        Ok(channels.into_iter().map(ChannelName::from).collect())
    }
}
