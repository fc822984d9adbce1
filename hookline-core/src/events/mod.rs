//! Event system for the webhook pipeline.
//!
//! # Event Flow
//!
//! 1. Domain code publishes on the [`EventBus`]
//! 2. `EventBatcher` groups publishes sharing one data object and enqueues a
//!    [`ProcessorJob`]
//! 3. `WebhookProcessor` runs each bound webhook's query and enqueues one
//!    [`DeliveryJob`] per produced payload
//! 4. `DeliveryWorker` signs and POSTs the payload
//!
//! Jobs between stages go through a `JobQueue`, never through detached
//! tasks, so shutdown ordering stays deterministic.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventListener};
pub use types::{DeliveryJob, ProcessorJob, PublishedEvent, Trigger, WebhookSummary};
