//! Webhook registration, listing, deletion and secret rotation.
//!
//! Registration validates the document, discovers its channels, checks the
//! URL with a signed verification handshake and only then persists the
//! webhook and its binding. A webhook that fails any step is never saved.

use crate::channels::ChannelRegistry;
use crate::discovery::ChannelDiscovery;
use crate::entities::{UpsertWebhook, Webhook};
use crate::store::{BindingStore, StoreError, WebhookStore};
use crate::utils::secret::random_hex_token;
use hookline_sdk::objects::{
    InputField, RegisterWebhookRequest, VerificationChallenge, WebhookSelector,
};
use hookline_sdk::signature::{SIGNATURE_HEADER, SignatureHeader};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The request is invalid; `field` names the offending input
    #[error("invalid {field}: {message}")]
    Input { field: InputField, message: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RegistrationError {
    fn document(message: impl Into<String>) -> Self {
        Self::Input {
            field: InputField::Document,
            message: message.into(),
        }
    }

    fn url(message: impl Into<String>) -> Self {
        Self::Input {
            field: InputField::Url,
            message: message.into(),
        }
    }
}

pub struct WebhookRegistrar {
    webhooks: Arc<dyn WebhookStore>,
    bindings: Arc<dyn BindingStore>,
    discovery: ChannelDiscovery,
    http_client: reqwest::Client,
}

impl WebhookRegistrar {
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        bindings: Arc<dyn BindingStore>,
        discovery: ChannelDiscovery,
        verification_timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(verification_timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            webhooks,
            bindings,
            discovery,
            http_client,
        })
    }

    fn registry(&self) -> &ChannelRegistry {
        self.discovery.registry()
    }

    /// Validate, verify and save a webhook for `owner_id`.
    ///
    /// Saving with an existing key replaces that webhook and re-enables it.
    pub async fn register(
        &self,
        owner_id: Uuid,
        request: RegisterWebhookRequest,
    ) -> Result<Webhook, RegistrationError> {
        let variables = Value::Object(request.variables.unwrap_or_default());

        let info = self
            .discovery
            .executor()
            .describe(&request.document, &variables)
            .await
            .map_err(|e| RegistrationError::document(e.to_string()))?;
        let channels = self
            .discovery
            .discover(&request.document, &variables, owner_id)
            .await
            .map_err(|e| RegistrationError::document(e.to_string()))?;

        let key = match request.key.filter(|k| !k.trim().is_empty()) {
            Some(key) => key,
            None => info.name.clone().ok_or_else(|| {
                RegistrationError::document("operation has no name, provide a key")
            })?,
        };

        let url = url::Url::parse(&request.url)
            .map_err(|e| RegistrationError::url(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RegistrationError::url("only http and https URLs are supported"));
        }

        let secret = self.webhooks.owner_secret(owner_id).await?;
        self.verify_endpoint(&url, &secret).await?;

        let webhook = self
            .webhooks
            .upsert(UpsertWebhook {
                owner_id,
                key,
                name: info.name,
                document: request.document,
                variables,
                url: url.to_string(),
                metadata: request.metadata.unwrap_or(Value::Null),
            })
            .await?;
        self.bindings
            .save(&webhook, &channels, self.registry().logic_version())
            .await?;

        info!(
            webhook_id = %webhook.id,
            owner_id = %owner_id,
            key = %webhook.key,
            channels = channels.len(),
            "Webhook registered"
        );
        Ok(webhook)
    }

    /// POST a signed challenge to `url`; the endpoint must echo it back.
    async fn verify_endpoint(&self, url: &url::Url, secret: &str) -> Result<(), RegistrationError> {
        let challenge = VerificationChallenge {
            challenge: random_hex_token(),
        };
        let body = serde_json::to_string(&challenge)
            .map_err(|e| RegistrationError::url(e.to_string()))?;
        let signature = SignatureHeader::sign(&body, secret.as_bytes());

        let response = self
            .http_client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| RegistrationError::url(format!("verification request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistrationError::url(format!(
                "verification request answered with status {}",
                status.as_u16()
            )));
        }
        let echoed: VerificationChallenge = response
            .json()
            .await
            .map_err(|e| RegistrationError::url(format!("malformed verification response: {e}")))?;
        if echoed != challenge {
            return Err(RegistrationError::url("verification challenge mismatch"));
        }
        debug!(url = %url, "Webhook endpoint verified");
        Ok(())
    }

    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<Webhook>, RegistrationError> {
        Ok(self.webhooks.list_for_owner(owner_id).await?)
    }

    /// Delete the owner's webhooks matching `selector` and their bindings.
    pub async fn delete(
        &self,
        owner_id: Uuid,
        selector: &WebhookSelector,
    ) -> Result<Vec<Webhook>, RegistrationError> {
        let deleted = self.webhooks.delete(owner_id, selector).await?;
        for webhook in &deleted {
            self.bindings.remove(webhook.id).await?;
        }
        info!(owner_id = %owner_id, deleted = deleted.len(), "Webhooks deleted");
        Ok(deleted)
    }

    /// Replace the signing secret shared by all of the owner's webhooks.
    pub async fn rotate_secret(&self, owner_id: Uuid) -> Result<String, RegistrationError> {
        let secret = self.webhooks.rotate_secret(owner_id).await?;
        info!(owner_id = %owner_id, "Owner signing secret rotated");
        Ok(secret)
    }

    /// The owner's current signing secret.
    pub async fn secret(&self, owner_id: Uuid) -> Result<String, RegistrationError> {
        Ok(self.webhooks.owner_secret(owner_id).await?)
    }
}
