//! Consumer-side helpers.

mod webhook;

pub use webhook::{verify_challenge, verify_webhook};
