//! WebhookProcessor.
//!
//! The WebhookProcessor is responsible for:
//! - Receiving [`ProcessorJob`]s from the processor queue
//! - Looking up the webhooks bound to the job's channels, each once
//! - Running every valid webhook's query against the batched event data, as
//!   the webhook's owner, with bounded concurrency
//! - Classifying the outcome and enqueueing one [`DeliveryJob`] per payload
//!
//! A preparation failure disables the webhook before its final, `fatal`
//! payload is enqueued, so later jobs skip it at lookup. If that enqueue
//! fails the webhook is re-enabled and the job retried. An emission failure
//! is delivered as an error payload and the webhook stays enabled.

use crate::channels::ChannelRegistry;
use crate::entities::Webhook;
use crate::events::{DeliveryJob, ProcessorJob, WebhookSummary};
use crate::query::{ExecutionRequest, LiveTransport, QueryExecutor, QueryFailure, Viewer};
use crate::queue::{Job, JobHandler, JobQueue, QueueError};
use crate::store::{BindingStore, StoreError, WebhookStore};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use itertools::Itertools;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors that fail a processor job and cause it to be retried.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Counters for one processed job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub webhooks: usize,
    pub deliveries: usize,
    pub invalidated: usize,
}

#[derive(Default)]
struct WebhookOutcome {
    deliveries: usize,
    invalidated: bool,
}

pub struct WebhookProcessor {
    webhooks: Arc<dyn WebhookStore>,
    bindings: Arc<dyn BindingStore>,
    executor: Arc<dyn QueryExecutor>,
    registry: Arc<ChannelRegistry>,
    deliveries: Arc<dyn JobQueue<DeliveryJob>>,
    concurrency: usize,
}

impl WebhookProcessor {
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        bindings: Arc<dyn BindingStore>,
        executor: Arc<dyn QueryExecutor>,
        registry: Arc<ChannelRegistry>,
        deliveries: Arc<dyn JobQueue<DeliveryJob>>,
        concurrency: usize,
    ) -> Self {
        Self {
            webhooks,
            bindings,
            executor,
            registry,
            deliveries,
            concurrency: concurrency.max(1),
        }
    }

    /// Process one batched change.
    ///
    /// Every webhook is run even if another one fails; the first error is
    /// returned afterwards so the job gets retried.
    pub async fn process(&self, job: &ProcessorJob) -> Result<ProcessSummary, ProcessError> {
        let mut ids = BTreeSet::new();
        for channel in &job.channels {
            ids.extend(self.bindings.list_for_channel(channel).await?);
        }
        if ids.is_empty() {
            debug!(trigger_id = %job.trigger.id, "No webhooks bound to triggered channels");
            return Ok(ProcessSummary::default());
        }

        let ids: Vec<Uuid> = ids.into_iter().collect();
        let webhooks: Vec<Webhook> = self
            .webhooks
            .get_many(&ids)
            .await?
            .into_iter()
            .filter(|w| w.valid)
            .collect();

        let transport = Arc::new(LiveTransport::for_batch(
            self.registry.clone(),
            &job.channels,
            Arc::new(job.data.clone()),
        ));

        let mut summary = ProcessSummary {
            webhooks: webhooks.len(),
            ..Default::default()
        };
        let outcomes: Vec<Result<WebhookOutcome, ProcessError>> = stream::iter(webhooks)
            .map(|webhook| {
                let transport = transport.clone();
                async move { self.run_webhook(webhook, job, transport).await }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let (succeeded, failed): (Vec<WebhookOutcome>, Vec<ProcessError>) =
            outcomes.into_iter().partition_result();
        for outcome in succeeded {
            summary.deliveries += outcome.deliveries;
            summary.invalidated += usize::from(outcome.invalidated);
        }
        if let Some(e) = failed.into_iter().next() {
            return Err(e);
        }

        debug!(
            trigger_id = %job.trigger.id,
            webhooks = summary.webhooks,
            deliveries = summary.deliveries,
            invalidated = summary.invalidated,
            "Processed trigger"
        );
        Ok(summary)
    }

    async fn run_webhook(
        &self,
        webhook: Webhook,
        job: &ProcessorJob,
        transport: Arc<LiveTransport>,
    ) -> Result<WebhookOutcome, ProcessError> {
        let summary = WebhookSummary::from(&webhook);
        let request = ExecutionRequest {
            document: webhook.document,
            variables: webhook.variables,
            viewer: Viewer {
                owner_id: webhook.owner_id,
            },
            transport,
        };

        let mut stream = match self.executor.execute(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    webhook_id = %summary.id,
                    trigger_id = %job.trigger.id,
                    error = %e,
                    "Webhook query failed to prepare, disabling webhook"
                );
                // Persisted first so concurrent and later jobs skip the webhook.
                if !self.webhooks.mark_invalid(summary.id).await? {
                    return Ok(WebhookOutcome::default());
                }
                let webhook_id = summary.id;
                let payload = QueryFailure::Fatal(e).payload();
                if let Err(e) = self.deliver(summary, payload, job, true).await {
                    // The retried job must find the webhook valid to send the payload.
                    if let Err(restore) = self.webhooks.restore_valid(webhook_id).await {
                        warn!(
                            webhook_id = %webhook_id,
                            error = %restore,
                            "Failed to re-enable webhook after its final payload was not enqueued"
                        );
                    }
                    return Err(e);
                }
                return Ok(WebhookOutcome {
                    deliveries: 1,
                    invalidated: true,
                });
            }
        };

        let mut outcome = WebhookOutcome::default();
        while let Some(item) = stream.next().await {
            let payload = match item {
                Ok(data) => json!({ "data": data }),
                Err(e) => {
                    warn!(
                        webhook_id = %summary.id,
                        trigger_id = %job.trigger.id,
                        error = %e,
                        "Webhook query failed on event"
                    );
                    QueryFailure::Emission(e).payload()
                }
            };
            self.deliver(summary.clone(), payload, job, false).await?;
            outcome.deliveries += 1;
        }
        Ok(outcome)
    }

    async fn deliver(
        &self,
        webhook: WebhookSummary,
        payload: serde_json::Value,
        job: &ProcessorJob,
        fatal: bool,
    ) -> Result<(), ProcessError> {
        let webhook_id = webhook.id;
        let job_id = self
            .deliveries
            .enqueue(DeliveryJob {
                webhook,
                payload,
                trigger: job.trigger,
                fatal,
            })
            .await?;
        debug!(webhook_id = %webhook_id, job_id = %job_id, fatal, "Enqueued delivery job");
        Ok(())
    }
}

#[async_trait]
impl JobHandler<ProcessorJob> for WebhookProcessor {
    type Error = ProcessError;

    async fn handle(&self, job: &Job<ProcessorJob>) -> Result<(), ProcessError> {
        self.process(&job.payload).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelName;
    use crate::entities::UpsertWebhook;
    use crate::events::Trigger;
    use crate::query::JsonQueryExecutor;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<DeliveryJob>>);

    #[async_trait]
    impl JobQueue<DeliveryJob> for Collecting {
        async fn enqueue(&self, payload: DeliveryJob) -> Result<Uuid, QueueError> {
            self.0.lock().unwrap().push(payload);
            Ok(Uuid::new_v4())
        }
    }

    /// Rejects the first enqueue as if the queue were down.
    #[derive(Default)]
    struct FlakyOnce {
        failed: std::sync::atomic::AtomicBool,
        jobs: Mutex<Vec<DeliveryJob>>,
    }

    #[async_trait]
    impl JobQueue<DeliveryJob> for FlakyOnce {
        async fn enqueue(&self, payload: DeliveryJob) -> Result<Uuid, QueueError> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(QueueError::Closed("delivery"));
            }
            self.jobs.lock().unwrap().push(payload);
            Ok(Uuid::new_v4())
        }
    }

    struct Fixture {
        store: MemoryStore,
        deliveries: Arc<Collecting>,
        processor: WebhookProcessor,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let deliveries = Arc::new(Collecting::default());
        let processor = WebhookProcessor::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(JsonQueryExecutor),
            Arc::new(ChannelRegistry::default()),
            deliveries.clone(),
            2,
        );
        Fixture {
            store,
            deliveries,
            processor,
        }
    }

    async fn bind(
        store: &MemoryStore,
        key: &str,
        document: serde_json::Value,
        channels: &[&str],
    ) -> Webhook {
        let webhook = store
            .upsert(UpsertWebhook {
                owner_id: Uuid::new_v4(),
                key: key.to_string(),
                name: None,
                document: document.to_string(),
                variables: json!({}),
                url: "http://localhost/hook".to_string(),
                metadata: json!({ "team": key }),
            })
            .await
            .unwrap();
        let channels: BTreeSet<ChannelName> = channels.iter().map(|c| ChannelName::from(*c)).collect();
        store.save(&webhook, &channels, 1).await.unwrap();
        webhook
    }

    fn job(channels: &[&str], data: serde_json::Value) -> ProcessorJob {
        ProcessorJob {
            trigger: Trigger::new(),
            channels: channels.iter().map(|c| ChannelName::from(*c)).collect(),
            data,
        }
    }

    #[tokio::test]
    async fn test_webhook_bound_to_two_triggered_channels_runs_once() {
        let f = fixture();
        let doc = json!({
            "operation": "subscription",
            "observe": ["project:created", "project:updated"],
        });
        let webhook = bind(&f.store, "a", doc, &["project:created", "project:updated"]).await;

        let summary = f
            .processor
            .process(&job(&["project:created", "project:updated"], json!({ "id": 1 })))
            .await
            .unwrap();
        assert_eq!(summary.webhooks, 1);
        assert_eq!(summary.deliveries, 1);

        let jobs = f.deliveries.0.lock().unwrap();
        assert_eq!(jobs[0].webhook.id, webhook.id);
        assert_eq!(jobs[0].payload, json!({ "data": { "id": 1 } }));
        assert!(!jobs[0].fatal);
    }

    #[tokio::test]
    async fn test_preparation_failure_disables_and_delivers_once() {
        let f = fixture();
        let broken = json!({ "operation": "query", "observe": ["project:created"] });
        let webhook = bind(&f.store, "broken", broken, &["project:created"]).await;

        let summary = f
            .processor
            .process(&job(&["project:created"], json!({})))
            .await
            .unwrap();
        assert_eq!(summary.invalidated, 1);
        assert!(!f.store.get(webhook.id).await.unwrap().unwrap().valid);

        f.processor
            .process(&job(&["project:created"], json!({})))
            .await
            .unwrap();

        let jobs = f.deliveries.0.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].fatal);
        assert_eq!(
            jobs[0].payload["errors"][0]["extensions"]["code"],
            "NOT_SUBSCRIPTION"
        );
    }

    #[tokio::test]
    async fn test_emission_failure_keeps_webhook_valid() {
        let f = fixture();
        let doc = json!({
            "operation": "subscription",
            "observe": ["project:updated"],
            "select": { "owner": "/owner" },
        });
        let webhook = bind(&f.store, "picky", doc, &["project:updated"]).await;

        f.processor
            .process(&job(&["project:updated"], json!({ "id": 1 })))
            .await
            .unwrap();
        f.processor
            .process(&job(&["project:updated"], json!({ "owner": "o" })))
            .await
            .unwrap();

        assert!(f.store.get(webhook.id).await.unwrap().unwrap().valid);
        let jobs = f.deliveries.0.lock().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| !j.fatal));
        assert!(jobs[0].payload.get("errors").is_some());
        assert_eq!(jobs[1].payload, json!({ "data": { "owner": "o" } }));
    }

    #[tokio::test]
    async fn test_delivery_job_carries_no_document() {
        let f = fixture();
        let doc = json!({ "operation": "subscription", "observe": ["x"] });
        bind(&f.store, "slim", doc, &["x"]).await;
        f.processor.process(&job(&["x"], json!(1))).await.unwrap();

        let jobs = f.deliveries.0.lock().unwrap();
        let encoded = serde_json::to_value(&jobs[0]).unwrap();
        assert!(encoded["webhook"].get("document").is_none());
        assert!(encoded["webhook"].get("variables").is_none());
        assert_eq!(encoded["webhook"]["metadata"], json!({ "team": "slim" }));
    }

    #[tokio::test]
    async fn test_fatal_payload_survives_failed_enqueue() {
        let store = MemoryStore::new();
        let deliveries = Arc::new(FlakyOnce::default());
        let processor = WebhookProcessor::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(JsonQueryExecutor),
            Arc::new(ChannelRegistry::default()),
            deliveries.clone(),
            1,
        );
        let broken = json!({ "operation": "query", "observe": ["project:created"] });
        let webhook = bind(&store, "broken", broken, &["project:created"]).await;
        let job = job(&["project:created"], json!({}));

        let first = processor.process(&job).await;
        assert!(matches!(first, Err(ProcessError::Queue(_))));
        assert!(store.get(webhook.id).await.unwrap().unwrap().valid);

        let retried = processor.process(&job).await.unwrap();
        assert_eq!(retried.invalidated, 1);
        assert!(!store.get(webhook.id).await.unwrap().unwrap().valid);

        processor.process(&job).await.unwrap();
        let jobs = deliveries.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].fatal);
        assert_eq!(jobs[0].trigger, job.trigger);
    }
}
