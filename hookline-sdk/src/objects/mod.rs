pub mod admin;
pub mod delivery;
pub mod webhook;

pub use delivery::{DeliveryBody, DeliveryError, DeliveryExtensions, TriggerInfo, WebhookExtension};
pub use webhook::{
    InputErrorResponse, InputField, RegisterWebhookRequest, SecretResponse, VerificationChallenge,
    WebhookResponse, WebhookSelector,
};
