//! Pipeline stages.
//!
//! - `EventBatcher`: listens on the event bus, enqueues `ProcessorJob`
//! - `WebhookProcessor`: handles `ProcessorJob`, enqueues `DeliveryJob`
//! - `DeliveryWorker`: handles `DeliveryJob`, POSTs to the webhook URL
//! - `ChannelMigration`: rebinds webhooks after a channel logic change

pub mod batcher;
pub mod delivery;
pub mod migration;
pub mod webhook_processor;

pub use batcher::{BatchDeadlines, EventBatcher};
pub use delivery::{DeliveryError, DeliveryWorker, build_body};
pub use migration::{ChannelMigration, MigrationError, MigrationReport};
pub use webhook_processor::{ProcessError, ProcessSummary, WebhookProcessor};
