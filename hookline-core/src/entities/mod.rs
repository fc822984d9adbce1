//! Database entities and their query structs.
//!
//! Every query is a struct processed by
//! [`DatabaseProcessor`](crate::framework::DatabaseProcessor) through
//! `kanau::processor::Processor`.

pub mod channel_bindings;
pub mod owner_secrets;
pub mod webhooks;

pub use webhooks::{UpsertWebhook, Webhook};
