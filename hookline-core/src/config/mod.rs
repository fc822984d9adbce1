//! Configuration types for the webhook pipeline.
//!
//! These types represent the validated runtime configuration and can be
//! shared across crates. Loading and parsing the config file is handled by
//! the server crate.

use crate::queue::RetryPolicy;
use std::time::Duration;

/// Default `user-agent` of outbound webhook requests.
pub const DEFAULT_USER_AGENT: &str = concat!("hookline/", env!("CARGO_PKG_VERSION"));

/// Runtime settings of the pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// How long a batch collects publishes sharing one data object.
    pub batch_window: Duration,
    /// Processor jobs run concurrently per process. Kept low because query
    /// execution shares the host with request handling.
    pub processor_concurrency: usize,
    /// Webhooks run concurrently within one processor job.
    pub webhook_concurrency: usize,
    /// Delivery jobs run concurrently per process.
    pub delivery_concurrency: usize,
    pub delivery_timeout: Duration,
    pub verification_timeout: Duration,
    pub user_agent: String,
    pub processor_retry: RetryPolicy,
    pub delivery_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(10),
            processor_concurrency: 2,
            webhook_concurrency: 4,
            delivery_concurrency: 32,
            delivery_timeout: Duration::from_secs(10),
            verification_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            processor_retry: RetryPolicy::processor(),
            delivery_retry: RetryPolicy::delivery(),
        }
    }
}
