//! HTTP API routers.

pub mod admin;
pub mod extractors;
pub mod webhooks;
