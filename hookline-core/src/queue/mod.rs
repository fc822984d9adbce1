//! At-least-once job queue between pipeline stages.
//!
//! A handler returning `Err` has its job retried after a backoff delay given
//! by the queue's [`RetryPolicy`]; once the policy's attempts are exhausted
//! the job is dropped and logged.

mod memory;

pub use memory::{JobRunner, MemoryJobQueue};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The consuming side of the queue is gone
    #[error("job queue {0} is closed")]
    Closed(&'static str),

    /// A runner was already started for this queue
    #[error("job queue {0} already has a runner")]
    AlreadyRunning(&'static str),
}

/// A unit of work with its delivery attempt counter.
#[derive(Debug, Clone, PartialEq)]
pub struct Job<T> {
    /// Stable across retries. Delivered as the request id so consumers can
    /// deduplicate.
    pub id: Uuid,
    /// 1 on the first attempt.
    pub attempt: u32,
    pub payload: T,
}

impl<T> Job<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: 1,
            payload,
        }
    }
}

/// Producer side of a job queue.
#[async_trait]
pub trait JobQueue<T: Send + 'static>: Send + Sync {
    /// Enqueue `payload` for immediate execution and return the job id.
    async fn enqueue(&self, payload: T) -> Result<Uuid, QueueError>;
}

/// Consumer side of a job queue.
#[async_trait]
pub trait JobHandler<T: Send + Sync + 'static>: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;

    async fn handle(&self, job: &Job<T>) -> Result<(), Self::Error>;
}

/// Exponential backoff with a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Processor jobs: failures usually mean a bug, so give up quickly.
    pub const fn processor() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delivery jobs: ride out a consumer endpoint being down for days.
    pub const fn delivery() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(6 * 60 * 60),
        }
    }

    /// Delay before the retry that follows failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether a job that just failed attempt `attempt` gets another one.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sum of all retry delays.
    pub fn total_window(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay(a)).sum()
    }
}
