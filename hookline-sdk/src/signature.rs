//! Signature algorithm and verification for Hookline deliveries.
//!
//! Every outbound webhook request (deliveries and the registration
//! handshake) carries an HMAC-SHA256 signature computed with the owner's
//! signing secret. The wire format for the header is:
//!
//! ```text
//! cord-signature: t={unix_timestamp},v1={hex_signature}
//! ```
//!
//! where `hex_signature = HMAC-SHA256("{unix_timestamp}.{json_body}", secret)`.

/// Header name for the HMAC signature.
pub const SIGNATURE_HEADER: &str = "cord-signature";

/// Header carrying the delivery job id, stable across retries of one job.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header naming the owner on registration API requests.
pub const OWNER_HEADER: &str = "Hookline-Owner";

/// Header carrying the owner's plaintext API token.
pub const OWNER_TOKEN_HEADER: &str = "Hookline-Owner-Token";

/// Header carrying the plaintext admin secret.
pub const ADMIN_AUTH_HEADER: &str = "Hookline-Admin-Authorization";

/// Maximum allowed age of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// A parsed or freshly computed `cord-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signature: Box<[u8]>,
}

impl SignatureHeader {
    /// Sign `body` with `key` using the current time.
    pub fn sign(body: &str, key: &[u8]) -> Self {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Self::sign_at(now, body, key)
    }

    /// Sign `body` with `key` as of `timestamp`.
    pub fn sign_at(timestamp: i64, body: &str, key: &[u8]) -> Self {
        let data = format!("{timestamp}.{body}");
        let signature = ring::hmac::sign(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
        );
        Self {
            timestamp,
            signature: signature.as_ref().to_owned().into_boxed_slice(),
        }
    }

    /// Parse a `t=...,v1=...` header value.
    ///
    /// Unknown `key=value` elements are ignored so that additional schemes
    /// can be added later without breaking older consumers.
    pub fn parse(value: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signature = None;
        for element in value.split(',') {
            let (key, val) = element
                .trim()
                .split_once('=')
                .ok_or(SignatureError::InvalidFormat)?;
            match key {
                "t" => {
                    timestamp = Some(val.parse().map_err(|_| SignatureError::InvalidFormat)?);
                }
                "v1" => {
                    let bytes = hex::decode(val).map_err(|_| SignatureError::InvalidHex)?;
                    signature = Some(bytes.into_boxed_slice());
                }
                _ => {}
            }
        }
        match (timestamp, signature) {
            (Some(timestamp), Some(signature)) => Ok(Self {
                timestamp,
                signature,
            }),
            _ => Err(SignatureError::InvalidFormat),
        }
    }

    /// Lowercase hex of the raw signature bytes.
    pub fn hex_signature(&self) -> String {
        hex::encode(&self.signature)
    }

    /// Verify the HMAC over `body` and the timestamp freshness.
    pub fn verify(&self, body: &str, key: &[u8]) -> Result<(), SignatureError> {
        let data = format!("{}.{}", self.timestamp, body);
        ring::hmac::verify(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
            self.signature.as_ref(),
        )?;
        check_timestamp(self.timestamp)
    }
}

impl std::fmt::Display for SignatureHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t={},v1={}", self.timestamp, self.hex_signature())
    }
}

// ---------------------------------------------------------------------------
// Timestamp validation
// ---------------------------------------------------------------------------

/// Check that a signature timestamp is within [`MAX_SIGNATURE_AGE`].
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if now - timestamp > MAX_SIGNATURE_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_format() {
        let header = SignatureHeader::sign_at(1_700_000_000, r#"{"a":1}"#, b"secret");
        let rendered = header.to_string();
        assert!(rendered.starts_with("t=1700000000,v1="));
        assert_eq!(rendered.len(), "t=1700000000,v1=".len() + 64);
    }

    #[test]
    fn test_signature_matches_hmac_of_timestamped_body() {
        let body = r#"{"data":{"id":"p1"}}"#;
        let header = SignatureHeader::sign_at(42, body, b"s3cret");
        let expected = ring::hmac::sign(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, b"s3cret"),
            format!("42.{body}").as_bytes(),
        );
        assert_eq!(header.hex_signature(), hex::encode(expected.as_ref()));
    }

    #[test]
    fn test_parse_roundtrip_and_verify() {
        let body = r#"{"x":true}"#;
        let header = SignatureHeader::sign(body, b"key");
        let parsed = SignatureHeader::parse(&header.to_string()).unwrap();
        assert_eq!(parsed, header);
        parsed.verify(body, b"key").unwrap();
        assert!(matches!(
            parsed.verify(body, b"other"),
            Err(SignatureError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_expired_signature_rejected() {
        let body = "{}";
        let old = time::OffsetDateTime::now_utc().unix_timestamp() - MAX_SIGNATURE_AGE - 10;
        let header = SignatureHeader::sign_at(old, body, b"key");
        assert!(matches!(
            header.verify(body, b"key"),
            Err(SignatureError::Expired)
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            SignatureHeader::parse("garbage"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            SignatureHeader::parse("t=1,v1=zz"),
            Err(SignatureError::InvalidHex)
        ));
        assert!(matches!(
            SignatureHeader::parse("t=1"),
            Err(SignatureError::InvalidFormat)
        ));
    }
}
