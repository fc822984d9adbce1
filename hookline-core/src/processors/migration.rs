//! ChannelMigration.
//!
//! Recomputes the binding of every webhook whose channels were resolved
//! under an older channel logic version. Run at deploy time, before the
//! pipeline starts dispatching, and on demand from the admin API.

use crate::discovery::ChannelDiscovery;
use crate::entities::Webhook;
use crate::events::{DeliveryJob, Trigger, WebhookSummary};
use crate::query::{PreparationError, QueryFailure};
use crate::queue::{JobQueue, QueueError};
use crate::store::{BindingStore, StoreError, WebhookStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Outcome of one migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub version: i32,
    /// Webhooks whose binding was recomputed.
    pub migrated: u64,
    /// Webhooks whose document no longer prepares and were disabled.
    pub invalidated: u64,
}

pub struct ChannelMigration {
    webhooks: Arc<dyn WebhookStore>,
    bindings: Arc<dyn BindingStore>,
    discovery: ChannelDiscovery,
    deliveries: Arc<dyn JobQueue<DeliveryJob>>,
}

impl ChannelMigration {
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        bindings: Arc<dyn BindingStore>,
        discovery: ChannelDiscovery,
        deliveries: Arc<dyn JobQueue<DeliveryJob>>,
    ) -> Self {
        Self {
            webhooks,
            bindings,
            discovery,
            deliveries,
        }
    }

    /// Rebind every stale webhook under the registry's logic version.
    ///
    /// A webhook whose document fails to prepare is disabled, sent its final
    /// `fatal` payload under a fresh trigger, and bound to no channels under
    /// the current version so it is not retried on every run. Its owner
    /// re-saving it recomputes the binding.
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        let version = self.discovery.registry().logic_version();
        let stale = self.bindings.get_stale(version).await?;
        let mut report = MigrationReport {
            version,
            ..Default::default()
        };
        if stale.is_empty() {
            debug!(version, "Channel bindings are up to date");
            return Ok(report);
        }
        info!(version, stale = stale.len(), "Migrating channel bindings");

        for webhook in self.webhooks.get_many(&stale).await? {
            let channels = match self
                .discovery
                .discover(&webhook.document, &webhook.variables, webhook.owner_id)
                .await
            {
                Ok(channels) => channels,
                Err(e) => {
                    warn!(
                        webhook_id = %webhook.id,
                        error = %e,
                        "Webhook no longer prepares, disabling during migration"
                    );
                    if self.disable(&webhook, e).await? {
                        report.invalidated += 1;
                    }
                    BTreeSet::new()
                }
            };
            self.bindings.save(&webhook, &channels, version).await?;
            report.migrated += 1;
        }

        info!(
            version,
            migrated = report.migrated,
            invalidated = report.invalidated,
            "Channel migration complete"
        );
        Ok(report)
    }

    /// Disable `webhook` and enqueue its final payload. Returns false if it
    /// was already disabled, in which case nothing is sent.
    async fn disable(
        &self,
        webhook: &Webhook,
        error: PreparationError,
    ) -> Result<bool, MigrationError> {
        if !self.webhooks.mark_invalid(webhook.id).await? {
            return Ok(false);
        }
        let job = DeliveryJob {
            webhook: WebhookSummary::from(webhook),
            payload: QueryFailure::Fatal(error).payload(),
            trigger: Trigger::new(),
            fatal: true,
        };
        if let Err(e) = self.deliveries.enqueue(job).await {
            // Left valid so the next run retries the whole hand-off.
            if let Err(restore) = self.webhooks.restore_valid(webhook.id).await {
                warn!(
                    webhook_id = %webhook.id,
                    error = %restore,
                    "Failed to re-enable webhook after its final payload was not enqueued"
                );
            }
            return Err(e.into());
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelName, ChannelRegistry};
    use crate::entities::UpsertWebhook;
    use crate::query::JsonQueryExecutor;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<DeliveryJob>>);

    #[async_trait]
    impl JobQueue<DeliveryJob> for Collecting {
        async fn enqueue(&self, payload: DeliveryJob) -> Result<Uuid, QueueError> {
            self.0.lock().unwrap().push(payload);
            Ok(Uuid::new_v4())
        }
    }

    fn migration_into(
        store: &MemoryStore,
        registry: ChannelRegistry,
        deliveries: Arc<Collecting>,
    ) -> ChannelMigration {
        ChannelMigration::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            ChannelDiscovery::new(Arc::new(JsonQueryExecutor), Arc::new(registry)),
            deliveries,
        )
    }

    fn migration(store: &MemoryStore, registry: ChannelRegistry) -> ChannelMigration {
        migration_into(store, registry, Arc::default())
    }

    async fn webhook(store: &MemoryStore, key: &str, document: serde_json::Value) -> Uuid {
        store
            .upsert(UpsertWebhook {
                owner_id: Uuid::new_v4(),
                key: key.to_string(),
                name: None,
                document: document.to_string(),
                variables: json!({}),
                url: "http://localhost/hook".to_string(),
                metadata: json!(null),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_version_bump_adds_new_channel() {
        let store = MemoryStore::new();
        let doc = json!({ "operation": "subscription", "observe": ["project:created"] });
        let id = webhook(&store, "w1", doc).await;

        let report = migration(&store, ChannelRegistry::new(1)).run().await.unwrap();
        assert_eq!(report.migrated, 1);

        let bumped = ChannelRegistry::new(2)
            .with_composite("project:created", ["project:created", "project:created:extra"]);
        let report = migration(&store, bumped).run().await.unwrap();
        assert_eq!(report.version, 2);
        assert_eq!(report.migrated, 1);

        let expected: BTreeSet<ChannelName> = ["project:created", "project:created:extra"]
            .into_iter()
            .map(ChannelName::from)
            .collect();
        assert_eq!(store.list_for_webhook(id).await.unwrap(), expected);
        assert!(store.get_stale(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broken_document_is_disabled_once() {
        let store = MemoryStore::new();
        let id = webhook(&store, "broken", json!({ "operation": "query" })).await;

        let report = migration(&store, ChannelRegistry::new(1)).run().await.unwrap();
        assert_eq!(report.invalidated, 1);
        assert!(!store.get(id).await.unwrap().unwrap().valid);

        let again = migration(&store, ChannelRegistry::new(1)).run().await.unwrap();
        assert_eq!(again.migrated, 0);
    }

    #[tokio::test]
    async fn test_webhook_broken_by_version_bump_gets_one_fatal_payload() {
        let store = MemoryStore::new();
        let deliveries = Arc::new(Collecting::default());
        let doc = json!({
            "operation": "subscription",
            "observe": ["project:created"],
            "variables": ["gone"],
        });
        let id = webhook(&store, "w1", doc).await;
        let webhook = store.get(id).await.unwrap().unwrap();
        store
            .save(&webhook, &BTreeSet::from([ChannelName::from("project:created")]), 1)
            .await
            .unwrap();

        let report = migration_into(&store, ChannelRegistry::new(2), deliveries.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(report.invalidated, 1);
        assert!(!store.get(id).await.unwrap().unwrap().valid);
        assert!(store.list_for_webhook(id).await.unwrap().is_empty());

        let again = migration_into(&store, ChannelRegistry::new(3), deliveries.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(again.invalidated, 0);

        let jobs = deliveries.0.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].fatal);
        assert_eq!(jobs[0].webhook.id, id);
        assert!(jobs[0].payload["errors"][0]["message"].is_string());
    }
}
