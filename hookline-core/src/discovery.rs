//! Channel discovery.
//!
//! Runs a webhook's document once through a [`DiscoveryTransport`], as the
//! webhook's owner, and returns the concrete channel names it observed.

use crate::channels::{ChannelName, ChannelRegistry};
use crate::query::{DiscoveryTransport, ExecutionRequest, PreparationError, QueryExecutor, Viewer};
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct ChannelDiscovery {
    executor: Arc<dyn QueryExecutor>,
    registry: Arc<ChannelRegistry>,
}

impl ChannelDiscovery {
    pub fn new(executor: Arc<dyn QueryExecutor>, registry: Arc<ChannelRegistry>) -> Self {
        Self { executor, registry }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    /// Discover the channels `document` depends on.
    ///
    /// A document observing nothing yields an empty set. Preparation errors
    /// are returned untouched; emission errors can not occur because the
    /// transport never yields data, and are ignored if an executor produces
    /// them anyway.
    pub async fn discover(
        &self,
        document: &str,
        variables: &serde_json::Value,
        owner_id: Uuid,
    ) -> Result<BTreeSet<ChannelName>, PreparationError> {
        let transport = Arc::new(DiscoveryTransport::new(self.registry.clone()));
        let mut stream = self
            .executor
            .execute(ExecutionRequest {
                document: document.to_string(),
                variables: variables.clone(),
                viewer: Viewer { owner_id },
                transport: transport.clone(),
            })
            .await?;
        while stream.next().await.is_some() {}
        let channels = transport.channels();
        tracing::debug!(owner_id = %owner_id, channels = channels.len(), "Discovered channels");
        Ok(channels)
    }
}
