//! In-process event bus.
//!
//! Domain code publishes `(channel, data)` pairs; every subscribed
//! [`EventListener`] is invoked synchronously on the publisher's call stack,
//! so listeners must only do bounded, non-blocking work.

use super::types::PublishedEvent;
use crate::channels::ChannelName;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// Receives every publish on the bus.
pub trait EventListener: Send + Sync {
    fn on_publish(&self, event: &PublishedEvent);
}

/// Cloneable handle to the bus.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for all subsequent publishes.
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Publish `data` on `channel`.
    pub fn publish(&self, channel: impl Into<ChannelName>, data: Arc<serde_json::Value>) {
        let event = PublishedEvent {
            channel: channel.into(),
            data,
        };
        trace!(channel = %event.channel, "Publishing event");
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_publish(&event);
        }
    }
}
