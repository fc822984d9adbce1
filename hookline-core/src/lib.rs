#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod channels;
pub mod config;
pub mod discovery;
pub mod entities;
pub mod events;
pub mod framework;
pub mod pipeline;
pub mod processors;
pub mod query;
pub mod queue;
pub mod registration;
pub mod store;
pub mod utils;
