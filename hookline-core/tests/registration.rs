mod common;

use common::{Consumer, Harness, mount, wait_for_deliveries};
use hookline_core::registration::RegistrationError;
use hookline_core::store::{BindingStore, WebhookStore};
use hookline_sdk::objects::{InputField, RegisterWebhookRequest, WebhookSelector};
use hookline_sdk::signature::SignatureHeader;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn request(harness: &Harness, name: &str, route: &str) -> RegisterWebhookRequest {
    RegisterWebhookRequest {
        key: None,
        document: json!({
            "operation": "subscription",
            "name": name,
            "observe": ["project:created"],
        })
        .to_string(),
        variables: None,
        url: harness.url(route),
        metadata: None,
    }
}

#[tokio::test]
async fn failed_handshake_saves_nothing() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/wrong"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "challenge": "nope" })))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&harness.server)
        .await;
    let owner = Uuid::new_v4();

    for route in ["/wrong", "/down"] {
        let err = harness
            .registrar
            .register(owner, request(&harness, "Created", route))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Input { field: InputField::Url, .. }
        ));
    }
    assert!(harness.store.list_for_owner(owner).await.unwrap().is_empty());
    assert!(harness.store.list_channels().await.unwrap().is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn handshake_is_signed_with_owner_secret() {
    let harness = Harness::start().await;
    mount(&harness.server, "/hook", Consumer::accepting()).await;
    let owner = Uuid::new_v4();
    harness
        .registrar
        .register(owner, request(&harness, "Created", "/hook"))
        .await
        .unwrap();

    let secret = harness.registrar.secret(owner).await.unwrap();
    let requests = harness.server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let handshake = &requests[0];
    let body = String::from_utf8(handshake.body.clone()).unwrap();
    let header = handshake
        .headers
        .get("cord-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(SignatureHeader::parse(header).unwrap().verify(&body, secret.as_bytes()).is_ok());

    harness.shutdown().await;
}

#[tokio::test]
async fn resaving_a_key_replaces_the_webhook() {
    let harness = Harness::start().await;
    mount(&harness.server, "/v1", Consumer::accepting()).await;
    mount(&harness.server, "/v2", Consumer::accepting()).await;
    let owner = Uuid::new_v4();

    let first = harness
        .registrar
        .register(owner, request(&harness, "Created", "/v1"))
        .await
        .unwrap();
    let second = harness
        .registrar
        .register(owner, request(&harness, "Created", "/v2"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    let listed = harness.registrar.list(owner).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].url.ends_with("/v2"));

    harness.shutdown().await;
}

#[tokio::test]
async fn delete_by_name_drops_bindings_and_unused_channels() {
    let harness = Harness::start().await;
    mount(&harness.server, "/hook", Consumer::accepting()).await;
    let owner = Uuid::new_v4();
    let kept = harness
        .registrar
        .register(
            owner,
            RegisterWebhookRequest {
                document: json!({
                    "operation": "subscription",
                    "name": "Kept",
                    "observe": ["project:updated"],
                })
                .to_string(),
                ..request(&harness, "Kept", "/hook")
            },
        )
        .await
        .unwrap();
    let dropped = harness
        .registrar
        .register(owner, request(&harness, "Dropped", "/hook"))
        .await
        .unwrap();

    let deleted = harness
        .registrar
        .delete(owner, &WebhookSelector::Name("Dropped".into()))
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].id, dropped.id);

    assert!(harness.store.get(dropped.id).await.unwrap().is_none());
    assert!(harness.store.list_for_channel("project:created").await.unwrap().is_empty());
    let channels: Vec<String> = harness
        .store
        .list_channels()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.to_string())
        .collect();
    assert_eq!(channels, vec!["project:updated".to_string()]);
    assert_eq!(
        harness.store.list_for_channel("project:updated").await.unwrap(),
        vec![kept.id]
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn rotated_secret_signs_later_deliveries() {
    let harness = Harness::start().await;
    mount(&harness.server, "/hook", Consumer::accepting()).await;
    let owner = Uuid::new_v4();
    harness
        .registrar
        .register(owner, request(&harness, "Created", "/hook"))
        .await
        .unwrap();

    let old = harness.registrar.secret(owner).await.unwrap();
    let new = harness.registrar.rotate_secret(owner).await.unwrap();
    assert_ne!(old, new);
    assert_eq!(harness.registrar.secret(owner).await.unwrap(), new);

    harness.publish("project:created", &Arc::new(json!({ "id": "p-1" })));
    let received = wait_for_deliveries(&harness.server, 1).await;
    assert_eq!(received.len(), 1);
    let header = SignatureHeader::parse(&received[0].signature).unwrap();
    assert!(header.verify(&received[0].body, new.as_bytes()).is_ok());
    assert!(header.verify(&received[0].body, old.as_bytes()).is_err());

    harness.shutdown().await;
}
