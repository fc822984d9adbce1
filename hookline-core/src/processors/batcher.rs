//! EventBatcher.
//!
//! The EventBatcher is responsible for:
//! - Listening to every publish on the [`EventBus`](crate::events::EventBus)
//! - Ignoring internal channels
//! - Grouping publishes that share one data object (by `Arc` identity, not
//!   by value) within a short window under one [`Trigger`]
//! - Enqueueing one [`ProcessorJob`] per batch when its window closes, and
//!   every pending batch on shutdown
//!
//! `on_publish` runs on the publisher's call stack. It only touches the
//! pending map and hands the batch deadline to the timer loop in
//! [`run`](EventBatcher::run), which does the enqueueing.

use crate::channels::{ChannelName, ChannelRegistry};
use crate::events::{EventListener, ProcessorJob, PublishedEvent, Trigger};
use crate::queue::JobQueue;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

/// Identity of an event's data object: the address of its `Arc` allocation.
/// Stable while the pending batch holds a clone of the `Arc`.
type BatchKey = usize;

struct PendingBatch {
    generation: u64,
    trigger: Trigger,
    data: Arc<serde_json::Value>,
    channels: BTreeSet<ChannelName>,
}

impl PendingBatch {
    fn into_job(self) -> ProcessorJob {
        ProcessorJob {
            trigger: self.trigger,
            channels: self.channels,
            data: self.data.as_ref().clone(),
        }
    }
}

struct Deadline {
    at: Instant,
    key: BatchKey,
    generation: u64,
}

/// Receiver of batch deadlines, consumed by [`EventBatcher::run`].
pub struct BatchDeadlines(mpsc::UnboundedReceiver<Deadline>);

pub struct EventBatcher {
    registry: Arc<ChannelRegistry>,
    window: Duration,
    pending: Mutex<HashMap<BatchKey, PendingBatch>>,
    generation: AtomicU64,
    deadline_tx: mpsc::UnboundedSender<Deadline>,
}

impl EventBatcher {
    /// Create a new EventBatcher.
    ///
    /// The returned [`BatchDeadlines`] must be passed to
    /// [`run`](Self::run), otherwise batches only flush on shutdown.
    pub fn new(registry: Arc<ChannelRegistry>, window: Duration) -> (Arc<Self>, BatchDeadlines) {
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();
        let batcher = Arc::new(Self {
            registry,
            window,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            deadline_tx,
        });
        (batcher, BatchDeadlines(deadline_rx))
    }

    /// Number of batches waiting for their window to close.
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<BatchKey, PendingBatch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the batch timer until shutdown is signaled, then flush every
    /// pending batch into `queue` before returning.
    pub async fn run(
        self: Arc<Self>,
        deadlines: BatchDeadlines,
        queue: Arc<dyn JobQueue<ProcessorJob>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(window_ms = self.window.as_millis() as u64, "EventBatcher started");
        let mut deadline_rx = deadlines.0;
        // Every batch gets the same window, so deadlines arrive in order.
        let mut scheduled: VecDeque<Deadline> = VecDeque::new();

        loop {
            let next = scheduled.front().map(|d| d.at);
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("EventBatcher received shutdown signal");
                        break;
                    }
                }

                Some(deadline) = deadline_rx.recv() => {
                    scheduled.push_back(deadline);
                }

                _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    if let Some(deadline) = scheduled.pop_front() {
                        self.flush(deadline.key, deadline.generation, queue.as_ref()).await;
                    }
                }
            }
        }

        let flushed = self.flush_all(queue.as_ref()).await;
        info!(flushed, "EventBatcher shutdown complete");
    }

    /// Enqueue the batch under `key` if it is still the one the deadline was
    /// created for.
    async fn flush(&self, key: BatchKey, generation: u64, queue: &dyn JobQueue<ProcessorJob>) {
        let batch = {
            let mut pending = self.lock_pending();
            let current = pending
                .get(&key)
                .is_some_and(|batch| batch.generation == generation);
            if current { pending.remove(&key) } else { None }
        };
        if let Some(batch) = batch {
            Self::enqueue(batch, queue).await;
        }
    }

    /// Enqueue every pending batch immediately. Returns how many were flushed.
    pub async fn flush_all(&self, queue: &dyn JobQueue<ProcessorJob>) -> usize {
        let batches: Vec<PendingBatch> = self.lock_pending().drain().map(|(_, b)| b).collect();
        let count = batches.len();
        for batch in batches {
            Self::enqueue(batch, queue).await;
        }
        count
    }

    async fn enqueue(batch: PendingBatch, queue: &dyn JobQueue<ProcessorJob>) {
        let trigger_id = batch.trigger.id;
        let channels = batch.channels.len();
        match queue.enqueue(batch.into_job()).await {
            Ok(job_id) => {
                debug!(trigger_id = %trigger_id, job_id = %job_id, channels, "Enqueued processor job");
            }
            Err(e) => {
                error!(trigger_id = %trigger_id, error = %e, "Failed to enqueue processor job");
            }
        }
    }
}

impl EventListener for EventBatcher {
    fn on_publish(&self, event: &PublishedEvent) {
        if self.registry.is_internal(&event.channel) {
            return;
        }
        let leaves = self.registry.expand(&event.channel);
        let key = Arc::as_ptr(&event.data) as BatchKey;

        let mut pending = self.lock_pending();
        let batch = pending.entry(key).or_insert_with(|| {
            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            let deadline = Deadline {
                at: Instant::now() + self.window,
                key,
                generation,
            };
            if self.deadline_tx.send(deadline).is_err() {
                warn!("EventBatcher timer is not running, batch will flush on shutdown only");
            }
            PendingBatch {
                generation,
                trigger: Trigger::new(),
                data: event.data.clone(),
                channels: BTreeSet::new(),
            }
        });
        batch.channels.extend(leaves);
    }
}
