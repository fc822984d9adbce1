//! Shared harness for pipeline integration tests.
//!
//! Runs the full pipeline on the in-memory store and job queues against a
//! wiremock server standing in for the consumer endpoints.

#![allow(dead_code)]

use hookline_core::channels::ChannelRegistry;
use hookline_core::config::PipelineConfig;
use hookline_core::discovery::ChannelDiscovery;
use hookline_core::entities::Webhook;
use hookline_core::events::{DeliveryJob, EventBus};
use hookline_core::pipeline::{Pipeline, PipelineHandle};
use hookline_core::query::JsonQueryExecutor;
use hookline_core::queue::{JobQueue, RetryPolicy};
use hookline_core::registration::WebhookRegistrar;
use hookline_core::store::MemoryStore;
use hookline_sdk::objects::RegisterWebhookRequest;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Echoes registration challenges and accepts deliveries, failing the first
/// `fail_deliveries` of them with a 500.
pub struct Consumer {
    fail_deliveries: usize,
    deliveries: AtomicUsize,
}

impl Consumer {
    pub fn accepting() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(fail_deliveries: usize) -> Self {
        Self {
            fail_deliveries,
            deliveries: AtomicUsize::new(0),
        }
    }
}

impl Respond for Consumer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        if body.get("challenge").is_some() {
            return ResponseTemplate::new(200).set_body_json(body);
        }
        let seen = self.deliveries.fetch_add(1, Ordering::SeqCst);
        if seen < self.fail_deliveries {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

pub async fn mount(server: &MockServer, route: &str, consumer: Consumer) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(consumer)
        .mount(server)
        .await;
}

/// A delivery POST as received by the consumer.
#[derive(Debug, Clone)]
pub struct Received {
    pub path: String,
    pub body: String,
    pub json: Value,
    pub signature: String,
    pub request_id: String,
}

/// Every non-handshake request received by `server`, in arrival order.
pub async fn deliveries(server: &MockServer) -> Vec<Received> {
    let header = |request: &Request, name: &str| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter_map(|request| {
            let body = String::from_utf8(request.body.clone()).ok()?;
            let json: Value = serde_json::from_str(&body).ok()?;
            if json.get("challenge").is_some() {
                return None;
            }
            Some(Received {
                path: request.url.path().to_string(),
                signature: header(&request, "cord-signature"),
                request_id: header(&request, "x-request-id"),
                body,
                json,
            })
        })
        .collect()
}

/// Poll until `server` has received at least `count` deliveries.
pub async fn wait_for_deliveries(server: &MockServer, count: usize) -> Vec<Received> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let received = deliveries(server).await;
        if received.len() >= count || tokio::time::Instant::now() > deadline {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        batch_window: Duration::from_millis(10),
        delivery_timeout: Duration::from_secs(2),
        verification_timeout: Duration::from_secs(2),
        processor_retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        delivery_retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub registry: Arc<ChannelRegistry>,
    pub registrar: WebhookRegistrar,
    pub bus: EventBus,
    pub deliveries: Arc<dyn JobQueue<DeliveryJob>>,
    pub server: MockServer,
    shutdown_tx: watch::Sender<bool>,
    handle: PipelineHandle,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(ChannelRegistry::default(), test_config()).await
    }

    pub async fn start_with(registry: ChannelRegistry, config: PipelineConfig) -> Self {
        let store = MemoryStore::new();
        let registry = Arc::new(registry);
        let executor = Arc::new(JsonQueryExecutor);
        let registrar = WebhookRegistrar::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            ChannelDiscovery::new(executor.clone(), registry.clone()),
            config.verification_timeout,
            &config.user_agent,
        )
        .expect("registrar");
        let pipeline = Pipeline::new(
            config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            executor,
            registry.clone(),
        )
        .expect("pipeline");
        let deliveries = pipeline.delivery_queue();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = pipeline.start(shutdown_rx).expect("pipeline start");

        Self {
            store,
            registry,
            registrar,
            bus: handle.bus(),
            deliveries,
            server: MockServer::start().await,
            shutdown_tx,
            handle,
        }
    }

    pub fn url(&self, route: &str) -> String {
        format!("{}{}", self.server.uri(), route)
    }

    pub async fn register(&self, owner_id: Uuid, document: Value, route: &str) -> Webhook {
        self.registrar
            .register(
                owner_id,
                RegisterWebhookRequest {
                    key: None,
                    document: document.to_string(),
                    variables: None,
                    url: self.url(route),
                    metadata: Some(serde_json::json!({ "route": route })),
                },
            )
            .await
            .expect("registration")
    }

    pub fn publish(&self, channel: &str, data: &Arc<Value>) {
        self.bus.publish(channel, data.clone());
    }

    /// Signal shutdown and wait for every stage to drain.
    pub async fn shutdown(self) -> MockServer {
        self.shutdown_tx.send(true).expect("shutdown signal");
        self.handle.join().await;
        self.server
    }
}
