//! Wiring of the pipeline stages.
//!
//! ```text
//! EventBus -> EventBatcher -> processor queue -> WebhookProcessor
//!          -> delivery queue -> DeliveryWorker -> HTTP POST
//! ```
//!
//! Shutdown runs stage by stage: the batcher flushes every pending batch
//! into the processor queue, the processor runner finishes what was queued
//! and in flight, then the delivery runner does the same.

use crate::channels::ChannelRegistry;
use crate::config::PipelineConfig;
use crate::events::{DeliveryJob, EventBus, ProcessorJob};
use crate::processors::{BatchDeadlines, DeliveryWorker, EventBatcher, WebhookProcessor};
use crate::query::QueryExecutor;
use crate::queue::{JobQueue, MemoryJobQueue, QueueError};
use crate::store::{BindingStore, WebhookStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A configured, not yet running pipeline.
pub struct Pipeline {
    bus: EventBus,
    batcher: Arc<EventBatcher>,
    deadlines: BatchDeadlines,
    processor_queue: MemoryJobQueue<ProcessorJob>,
    delivery_queue: MemoryJobQueue<DeliveryJob>,
    processor: Arc<WebhookProcessor>,
    delivery: Arc<DeliveryWorker>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        webhooks: Arc<dyn WebhookStore>,
        bindings: Arc<dyn BindingStore>,
        executor: Arc<dyn QueryExecutor>,
        registry: Arc<ChannelRegistry>,
    ) -> Result<Self, PipelineError> {
        let bus = EventBus::new();
        let (batcher, deadlines) = EventBatcher::new(registry.clone(), config.batch_window);
        bus.subscribe(batcher.clone());

        let processor_queue = MemoryJobQueue::new("processor");
        let delivery_queue = MemoryJobQueue::new("delivery");
        let processor = Arc::new(WebhookProcessor::new(
            webhooks.clone(),
            bindings,
            executor,
            registry,
            Arc::new(delivery_queue.clone()),
            config.webhook_concurrency,
        ));
        let delivery = Arc::new(DeliveryWorker::new(
            webhooks,
            config.delivery_timeout,
            &config.user_agent,
        )?);

        Ok(Self {
            bus,
            batcher,
            deadlines,
            processor_queue,
            delivery_queue,
            processor,
            delivery,
            config,
        })
    }

    /// Handle for publishing domain events into the pipeline.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Producer handle for the delivery queue. Jobs enqueued before
    /// [`start`](Self::start) wait for the delivery runner.
    pub fn delivery_queue(&self) -> Arc<dyn JobQueue<DeliveryJob>> {
        Arc::new(self.delivery_queue.clone())
    }

    /// Spawn every stage. They run until `shutdown_rx` flips to `true`.
    pub fn start(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<PipelineHandle, PipelineError> {
        let (batcher_tx, batcher_rx) = watch::channel(false);
        let (processor_tx, processor_rx) = watch::channel(false);
        let (delivery_tx, delivery_rx) = watch::channel(false);

        let processor_runner = self.processor_queue.runner(
            self.processor,
            self.config.processor_concurrency,
            self.config.processor_retry,
            processor_rx,
        )?;
        let delivery_runner = self.delivery_queue.runner(
            self.delivery,
            self.config.delivery_concurrency,
            self.config.delivery_retry,
            delivery_rx,
        )?;

        let batcher_task = tokio::spawn(self.batcher.run(
            self.deadlines,
            Arc::new(self.processor_queue),
            batcher_rx,
        ));
        let processor_task = tokio::spawn(processor_runner.run());
        let delivery_task = tokio::spawn(delivery_runner.run());

        let supervisor = tokio::spawn(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
            info!("Pipeline shutting down");

            let stages = [
                ("batcher", batcher_tx, batcher_task),
                ("processor", processor_tx, processor_task),
                ("delivery", delivery_tx, delivery_task),
            ];
            for (stage, tx, task) in stages {
                let _ = tx.send(true);
                if let Err(e) = task.await {
                    error!(stage, error = %e, "Pipeline stage panicked");
                }
            }
            info!("Pipeline shutdown complete");
        });

        info!("Pipeline started");
        Ok(PipelineHandle {
            bus: self.bus,
            supervisor,
        })
    }
}

/// A running pipeline.
pub struct PipelineHandle {
    bus: EventBus,
    supervisor: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Wait until every stage has stopped.
    pub async fn join(self) {
        if let Err(e) = self.supervisor.await {
            error!(error = %e, "Pipeline supervisor panicked");
        }
    }
}
