use super::ObservationTransport;
use crate::channels::{ChannelName, ChannelRegistry};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Yields the event data of one batched change.
///
/// Observing a channel yields the data of every batched event published on
/// one of the channel's leaf names, once per distinct value, then completes.
pub struct LiveTransport {
    registry: Arc<ChannelRegistry>,
    events: BTreeMap<ChannelName, Arc<Value>>,
}

impl LiveTransport {
    pub fn new(registry: Arc<ChannelRegistry>, events: BTreeMap<ChannelName, Arc<Value>>) -> Self {
        Self { registry, events }
    }

    /// Transport for a batch whose events all share `data`.
    pub fn for_batch<'a>(
        registry: Arc<ChannelRegistry>,
        channels: impl IntoIterator<Item = &'a ChannelName>,
        data: Arc<Value>,
    ) -> Self {
        let events = channels
            .into_iter()
            .map(|c| (c.clone(), data.clone()))
            .collect();
        Self::new(registry, events)
    }
}

impl ObservationTransport for LiveTransport {
    fn observe(&self, channel: &str) -> BoxStream<'static, Value> {
        let mut items: Vec<Value> = Vec::new();
        for leaf in self.registry.expand(channel) {
            let Some(data) = self.events.get(&leaf) else {
                continue;
            };
            if !items.iter().any(|seen| seen == data.as_ref()) {
                items.push(data.as_ref().clone());
            }
        }
        stream::iter(items).boxed()
    }
}

/// Records which channels a query observes and never yields data.
///
/// Each observation completes immediately, so a query run through this
/// transport terminates as soon as it has subscribed to everything it needs.
pub struct DiscoveryTransport {
    registry: Arc<ChannelRegistry>,
    seen: Mutex<BTreeSet<ChannelName>>,
}

impl DiscoveryTransport {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            registry,
            seen: Mutex::new(BTreeSet::new()),
        }
    }

    /// The expanded leaf names observed so far.
    pub fn channels(&self) -> BTreeSet<ChannelName> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ObservationTransport for DiscoveryTransport {
    fn observe(&self, channel: &str) -> BoxStream<'static, Value> {
        let leaves = self.registry.expand(channel);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(leaves);
        stream::empty().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Arc<ChannelRegistry> {
        Arc::new(
            ChannelRegistry::default()
                .with_composite("project:lifecycle", ["project:created", "project:deleted"]),
        )
    }

    #[tokio::test]
    async fn test_live_transport_yields_shared_data_once() {
        let data = Arc::new(json!({ "id": 1 }));
        let channels = [
            ChannelName::from("project:created"),
            ChannelName::from("project:deleted"),
        ];
        let transport = LiveTransport::for_batch(registry(), &channels, data);

        let items: Vec<Value> = transport.observe("project:lifecycle").collect().await;
        assert_eq!(items, vec![json!({ "id": 1 })]);

        let none: Vec<Value> = transport.observe("project:updated").collect().await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_transport_records_leaves_and_completes() {
        let transport = DiscoveryTransport::new(registry());
        let items: Vec<Value> = transport.observe("project:lifecycle").collect().await;
        assert!(items.is_empty());
        transport.observe("owner:42");

        let expected: BTreeSet<ChannelName> = ["owner:42", "project:created", "project:deleted"]
            .into_iter()
            .map(ChannelName::from)
            .collect();
        assert_eq!(transport.channels(), expected);
    }
}
