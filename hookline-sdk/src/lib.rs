//! Shared wire types and signature helpers for Hookline.
//!
//! Consumers of Hookline webhooks only need this crate: it defines the
//! delivery envelope (`extensions.webhook`), the registration API objects,
//! and the `cord-signature` verification routine.

#![forbid(unsafe_code)]

pub mod client;
pub mod objects;
pub mod signature;
