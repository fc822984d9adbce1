//! Application state shared across all request handlers.

use crate::config::runtime::AuthConfig;
use hookline_core::events::EventBus;
use hookline_core::processors::ChannelMigration;
use hookline_core::registration::WebhookRegistrar;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub registrar: Arc<WebhookRegistrar>,
    pub migration: Arc<ChannelMigration>,
    /// Publishing handle of the running pipeline.
    pub bus: EventBus,
    /// Credentials (can be reloaded via SIGHUP).
    pub auth: Arc<RwLock<AuthConfig>>,
}

impl AppState {
    pub fn new(
        registrar: WebhookRegistrar,
        migration: ChannelMigration,
        bus: EventBus,
        auth: AuthConfig,
    ) -> Self {
        Self {
            registrar: Arc::new(registrar),
            migration: Arc::new(migration),
            bus,
            auth: Arc::new(RwLock::new(auth)),
        }
    }

    /// Get a read lock on the credentials.
    pub async fn auth(&self) -> tokio::sync::RwLockReadGuard<'_, AuthConfig> {
        self.auth.read().await
    }

    /// Replace the credentials (used during SIGHUP reload).
    pub async fn update_auth(&self, auth: AuthConfig) {
        *self.auth.write().await = auth;
    }
}
