//! Webhook signature verification helpers.
//!
//! Convenience wrappers around [`SignatureHeader`] for verifying incoming
//! webhook payloads sent by a Hookline server.

use serde::de::DeserializeOwned;

use crate::objects::VerificationChallenge;
use crate::signature::{SignatureError, SignatureHeader};

/// Verify and deserialize an incoming Hookline webhook delivery.
///
/// * `signature_header` – value of the `cord-signature` request header.
/// * `body` – raw JSON request body string.
/// * `secret` – the owner's signing secret.
///
/// # Example
///
/// ```ignore
/// use hookline_sdk::client::verify_webhook;
/// use hookline_sdk::objects::DeliveryBody;
///
/// let delivery: DeliveryBody = verify_webhook(signature_header, &body, secret)?;
/// if !delivery.extensions.webhook.valid {
///     // the webhook was disabled and must be re-saved by its owner
/// }
/// ```
pub fn verify_webhook<T: DeserializeOwned>(
    signature_header: &str,
    body: &str,
    secret: &[u8],
) -> Result<T, SignatureError> {
    SignatureHeader::parse(signature_header)?.verify(body, secret)?;
    Ok(serde_json::from_str(body)?)
}

/// Verify a registration handshake request and build the response body the
/// endpoint must answer with.
pub fn verify_challenge(
    signature_header: &str,
    body: &str,
    secret: &[u8],
) -> Result<VerificationChallenge, SignatureError> {
    verify_webhook(signature_header, body, secret)
}
