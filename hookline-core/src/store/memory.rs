use super::{BindingStore, StoreError, WebhookStore};
use crate::channels::ChannelName;
use crate::entities::{UpsertWebhook, Webhook};
use crate::utils::secret::random_hex_token;
use async_trait::async_trait;
use hookline_sdk::objects::WebhookSelector;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// In-memory webhook and binding store.
///
/// Implements both [`WebhookStore`] and [`BindingStore`] over one shared
/// state so that deleting a webhook and dropping its binding stay consistent.
/// The lock is never held across an await point.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    webhooks: HashMap<Uuid, Webhook>,
    secrets: HashMap<Uuid, String>,
    /// Channel entry -> webhooks observing it. Never holds an empty set.
    channels: BTreeMap<ChannelName, BTreeSet<Uuid>>,
    bindings: HashMap<Uuid, Binding>,
}

struct Binding {
    channels: BTreeSet<ChannelName>,
    version: i32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryState {
    fn unbind(&mut self, webhook_id: Uuid, channel: &ChannelName) {
        if let Some(observers) = self.channels.get_mut(channel) {
            observers.remove(&webhook_id);
            if observers.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    fn remove_binding(&mut self, webhook_id: Uuid) {
        if let Some(binding) = self.bindings.remove(&webhook_id) {
            for channel in &binding.channels {
                self.unbind(webhook_id, channel);
            }
        }
    }
}

fn selector_matches(webhook: &Webhook, selector: &WebhookSelector) -> bool {
    match selector {
        WebhookSelector::Id(id) => webhook.id == *id,
        WebhookSelector::Key(key) => webhook.key == *key,
        WebhookSelector::Name(name) => webhook.name.as_deref() == Some(name.as_str()),
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Webhook>, StoreError> {
        Ok(self.state().webhooks.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Webhook>, StoreError> {
        let state = self.state();
        Ok(ids
            .iter()
            .filter_map(|id| state.webhooks.get(id).cloned())
            .collect())
    }

    async fn upsert(&self, upsert: UpsertWebhook) -> Result<Webhook, StoreError> {
        let now = time::OffsetDateTime::now_utc();
        let mut state = self.state();
        let existing = state
            .webhooks
            .values()
            .find(|w| w.owner_id == upsert.owner_id && w.key == upsert.key)
            .map(|w| (w.id, w.created_at));
        let (id, created_at) = existing.unwrap_or_else(|| (Uuid::new_v4(), now));
        let webhook = Webhook {
            id,
            owner_id: upsert.owner_id,
            key: upsert.key,
            name: upsert.name,
            document: upsert.document,
            variables: upsert.variables,
            url: upsert.url,
            metadata: upsert.metadata,
            valid: true,
            created_at,
            updated_at: now,
        };
        state.webhooks.insert(id, webhook.clone());
        Ok(webhook)
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Webhook>, StoreError> {
        let mut webhooks: Vec<Webhook> = self
            .state()
            .webhooks
            .values()
            .filter(|w| w.owner_id == owner_id)
            .cloned()
            .collect();
        webhooks.sort_by_key(|w| w.created_at);
        Ok(webhooks)
    }

    async fn delete(
        &self,
        owner_id: Uuid,
        selector: &WebhookSelector,
    ) -> Result<Vec<Webhook>, StoreError> {
        let mut state = self.state();
        let ids: Vec<Uuid> = state
            .webhooks
            .values()
            .filter(|w| w.owner_id == owner_id && selector_matches(w, selector))
            .map(|w| w.id)
            .collect();
        let mut deleted = Vec::with_capacity(ids.len());
        for id in ids {
            state.remove_binding(id);
            if let Some(webhook) = state.webhooks.remove(&id) {
                deleted.push(webhook);
            }
        }
        Ok(deleted)
    }

    async fn mark_invalid(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.webhooks.get_mut(&id) {
            Some(webhook) if webhook.valid => {
                webhook.valid = false;
                webhook.updated_at = time::OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_valid(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.webhooks.get_mut(&id) {
            Some(webhook) if !webhook.valid => {
                webhook.valid = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn owner_secret(&self, owner_id: Uuid) -> Result<String, StoreError> {
        Ok(self
            .state()
            .secrets
            .entry(owner_id)
            .or_insert_with(random_hex_token)
            .clone())
    }

    async fn rotate_secret(&self, owner_id: Uuid) -> Result<String, StoreError> {
        let secret = random_hex_token();
        self.state().secrets.insert(owner_id, secret.clone());
        Ok(secret)
    }
}

#[async_trait]
impl BindingStore for MemoryStore {
    async fn save(
        &self,
        webhook: &Webhook,
        channels: &BTreeSet<ChannelName>,
        version: i32,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state.webhooks.contains_key(&webhook.id) {
            return Err(StoreError::WebhookNotFound(webhook.id));
        }

        let previous = state
            .bindings
            .get(&webhook.id)
            .map(|b| b.channels.clone())
            .unwrap_or_default();
        for dropped in previous.difference(channels) {
            state.unbind(webhook.id, dropped);
        }
        for channel in channels {
            state
                .channels
                .entry(channel.clone())
                .or_default()
                .insert(webhook.id);
        }
        state.bindings.insert(
            webhook.id,
            Binding {
                channels: channels.clone(),
                version,
            },
        );
        Ok(())
    }

    async fn list_for_channel(&self, channel: &str) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .state()
            .channels
            .get(channel)
            .map(|observers| observers.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn list_for_webhook(
        &self,
        webhook_id: Uuid,
    ) -> Result<BTreeSet<ChannelName>, StoreError> {
        Ok(self
            .state()
            .bindings
            .get(&webhook_id)
            .map(|b| b.channels.clone())
            .unwrap_or_default())
    }

    async fn get_stale(&self, current_version: i32) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state();
        let mut stale: Vec<&Webhook> = state
            .webhooks
            .values()
            .filter(|w| {
                state
                    .bindings
                    .get(&w.id)
                    .is_none_or(|b| b.version != current_version)
            })
            .collect();
        stale.sort_by_key(|w| w.created_at);
        Ok(stale.into_iter().map(|w| w.id).collect())
    }

    async fn remove(&self, webhook_id: Uuid) -> Result<(), StoreError> {
        self.state().remove_binding(webhook_id);
        Ok(())
    }

    async fn list_channels(&self) -> Result<BTreeSet<ChannelName>, StoreError> {
        Ok(self.state().channels.keys().cloned().collect())
    }
}
