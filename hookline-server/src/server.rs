//! Axum server setup and router configuration.

use crate::api;
use crate::state::AppState;
use axum::{Json, Router, response::IntoResponse, routing::get};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(api::webhooks::router())
        .merge(api::admin::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run the server until `shutdown` completes, then stop accepting and wait
/// for open requests.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::runtime::{AdminConfig, AuthConfig, OwnerTokens};
    use argon2::{
        Argon2, PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hookline_core::channels::ChannelRegistry;
    use hookline_core::discovery::ChannelDiscovery;
    use hookline_core::events::{DeliveryJob, EventBus};
    use hookline_core::processors::ChannelMigration;
    use hookline_core::query::JsonQueryExecutor;
    use hookline_core::queue::MemoryJobQueue;
    use hookline_core::registration::WebhookRegistrar;
    use hookline_core::store::MemoryStore;
    use hookline_sdk::signature::{ADMIN_AUTH_HEADER, OWNER_HEADER, OWNER_TOKEN_HEADER};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn hash(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    fn app(owner: Uuid) -> Router {
        let store = MemoryStore::new();
        let discovery = ChannelDiscovery::new(
            Arc::new(JsonQueryExecutor::new()),
            Arc::new(ChannelRegistry::default()),
        );
        let registrar = WebhookRegistrar::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            discovery.clone(),
            Duration::from_secs(1),
            "hookline-test",
        )
        .unwrap();
        let migration = ChannelMigration::new(
            Arc::new(store.clone()),
            Arc::new(store),
            discovery,
            Arc::new(MemoryJobQueue::<DeliveryJob>::new("delivery")),
        );
        let auth = AuthConfig {
            admin: AdminConfig::new(hash("admin-secret")),
            owners: OwnerTokens::new([(owner, hash("owner-token"))]),
        };
        build_router(AppState::new(registrar, migration, EventBus::new(), auth))
    }

    fn owner_request(owner: Uuid, token: &str, method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(OWNER_HEADER, owner.to_string())
            .header(OWNER_TOKEN_HEADER, token)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(Uuid::new_v4())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_owner_token_is_required() {
        let owner = Uuid::new_v4();
        let app = app(owner);

        let missing = app
            .clone()
            .oneshot(Request::get("/webhooks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(owner_request(owner, "nope", "GET", "/webhooks", Value::Null))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let listed = app
            .oneshot(owner_request(owner, "owner-token", "GET", "/webhooks", Value::Null))
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        assert_eq!(json_body(listed).await, json!([]));
    }

    #[tokio::test]
    async fn test_invalid_document_answers_field_error() {
        let owner = Uuid::new_v4();
        let body = json!({
            "document": "{ not json",
            "url": "https://example.com/hook",
        });
        let response = app(owner)
            .oneshot(owner_request(owner, "owner-token", "POST", "/webhooks", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["field"], "document");
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_secret() {
        let app = app(Uuid::new_v4());
        let publish = |secret: &str| {
            Request::post("/admin/events")
                .header(ADMIN_AUTH_HEADER, secret)
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "channel": "project:created", "data": { "id": "p-1" } }).to_string(),
                ))
                .unwrap()
        };

        let rejected = app.clone().oneshot(publish("wrong")).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let accepted = app.clone().oneshot(publish("admin-secret")).await.unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);

        let migrated = app
            .oneshot(
                Request::post("/admin/channels/migrate")
                    .header(ADMIN_AUTH_HEADER, "admin-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(migrated.status(), StatusCode::OK);
        assert_eq!(json_body(migrated).await["migrated"], 0);
    }
}
