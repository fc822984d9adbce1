use super::{Job, JobHandler, JobQueue, QueueError, RetryPolicy};
use async_trait::async_trait;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct Scheduled<T> {
    run_at: Instant,
    seq: u64,
    job: Job<T>,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.run_at
            .cmp(&other.run_at)
            .then(self.seq.cmp(&other.seq))
    }
}

/// In-process job queue.
///
/// Jobs live only in memory: a crash loses whatever was queued. Cloning
/// yields another producer handle for the same queue.
pub struct MemoryJobQueue<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<(Instant, Job<T>)>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<(Instant, Job<T>)>>>>,
}

impl<T> Clone for MemoryJobQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> MemoryJobQueue<T> {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue `payload` to run no earlier than `delay` from now.
    pub fn enqueue_delayed(&self, payload: T, delay: Duration) -> Result<Uuid, QueueError> {
        let job = Job::new(payload);
        let id = job.id;
        self.tx
            .send((Instant::now() + delay, job))
            .map_err(|_| QueueError::Closed(self.name))?;
        Ok(id)
    }

    /// Create the consumer for this queue. Only one runner may exist.
    pub fn runner<H>(
        &self,
        handler: Arc<H>,
        concurrency: usize,
        policy: RetryPolicy,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<JobRunner<T, H>, QueueError>
    where
        H: JobHandler<T>,
    {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(QueueError::AlreadyRunning(self.name))?;
        Ok(JobRunner {
            name: self.name,
            rx,
            handler,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            policy,
            shutdown_rx,
            delayed: BinaryHeap::new(),
            seq: 0,
        })
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> JobQueue<T> for MemoryJobQueue<T> {
    async fn enqueue(&self, payload: T) -> Result<Uuid, QueueError> {
        self.enqueue_delayed(payload, Duration::ZERO)
    }
}

type Outcome<T> = (Job<T>, Result<(), String>);

/// Executes jobs from one [`MemoryJobQueue`] with bounded concurrency.
pub struct JobRunner<T, H> {
    name: &'static str,
    rx: mpsc::UnboundedReceiver<(Instant, Job<T>)>,
    handler: Arc<H>,
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
    shutdown_rx: watch::Receiver<bool>,
    delayed: BinaryHeap<Reverse<Scheduled<T>>>,
    seq: u64,
}

impl<T, H> JobRunner<T, H>
where
    T: Send + Sync + 'static,
    H: JobHandler<T>,
{
    /// Run until the shutdown signal flips.
    ///
    /// On shutdown, jobs already enqueued and due are still executed and
    /// in-flight jobs are awaited. Jobs waiting for a retry delay are dropped.
    pub async fn run(mut self) {
        info!(queue = self.name, "Job runner started");
        let mut in_flight: JoinSet<Outcome<T>> = JoinSet::new();

        loop {
            let next_due = self.delayed.peek().map(|Reverse(s)| s.run_at);
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(queue = self.name, "Job runner received shutdown signal");
                        break;
                    }
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.settle(joined, true);
                }

                received = self.rx.recv() => {
                    match received {
                        Some((run_at, job)) => self.schedule(run_at, job, &mut in_flight).await,
                        None => {
                            info!(queue = self.name, "Job queue closed");
                            break;
                        }
                    }
                }

                _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    self.dispatch_due(&mut in_flight).await;
                }
            }
        }

        // Drain what was enqueued before shutdown, then wait for in-flight work.
        while let Ok((run_at, job)) = self.rx.try_recv() {
            self.schedule(run_at, job, &mut in_flight).await;
        }
        while let Some(joined) = in_flight.join_next().await {
            self.settle(joined, false);
        }
        if !self.delayed.is_empty() {
            warn!(
                queue = self.name,
                dropped = self.delayed.len(),
                "Dropping delayed jobs on shutdown"
            );
        }

        info!(queue = self.name, "Job runner shutdown complete");
    }

    async fn schedule(&mut self, run_at: Instant, job: Job<T>, in_flight: &mut JoinSet<Outcome<T>>) {
        if run_at <= Instant::now() {
            self.spawn(job, in_flight).await;
        } else {
            self.delay(run_at, job);
        }
    }

    fn delay(&mut self, run_at: Instant, job: Job<T>) {
        self.seq += 1;
        self.delayed.push(Reverse(Scheduled {
            run_at,
            seq: self.seq,
            job,
        }));
    }

    async fn dispatch_due(&mut self, in_flight: &mut JoinSet<Outcome<T>>) {
        let now = Instant::now();
        while self.delayed.peek().is_some_and(|Reverse(s)| s.run_at <= now) {
            if let Some(Reverse(scheduled)) = self.delayed.pop() {
                self.spawn(scheduled.job, in_flight).await;
            }
        }
    }

    async fn spawn(&mut self, job: Job<T>, in_flight: &mut JoinSet<Outcome<T>>) {
        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            error!(queue = self.name, job_id = %job.id, "Job runner semaphore closed");
            return;
        };
        let handler = self.handler.clone();
        debug!(queue = self.name, job_id = %job.id, attempt = job.attempt, "Running job");
        in_flight.spawn(async move {
            let result = handler.handle(&job).await.map_err(|e| e.to_string());
            drop(permit);
            (job, result)
        });
    }

    fn settle(&mut self, joined: Result<Outcome<T>, tokio::task::JoinError>, retry: bool) {
        let (mut job, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(queue = self.name, error = %e, "Job task panicked");
                return;
            }
        };
        let Err(message) = result else {
            debug!(queue = self.name, job_id = %job.id, attempt = job.attempt, "Job completed");
            return;
        };

        if !self.policy.should_retry(job.attempt) {
            error!(
                queue = self.name,
                job_id = %job.id,
                attempt = job.attempt,
                error = %message,
                "Job failed and exhausted its retries, dropping"
            );
            return;
        }
        if !retry {
            warn!(
                queue = self.name,
                job_id = %job.id,
                attempt = job.attempt,
                error = %message,
                "Job failed during shutdown, not retrying"
            );
            return;
        }

        let delay = self.policy.delay(job.attempt);
        warn!(
            queue = self.name,
            job_id = %job.id,
            attempt = job.attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %message,
            "Job failed, scheduling retry"
        );
        job.attempt += 1;
        self.delay(Instant::now() + delay, job);
    }
}
