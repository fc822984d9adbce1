//! Custom Axum extractors for request authentication.
//!
//! Provides:
//! - `OwnerAuth` verifies the `Hookline-Owner` / `Hookline-Owner-Token`
//!   header pair against the configured owner tokens (registration API).
//! - `AdminAuth` verifies the `Hookline-Admin-Authorization` header against
//!   the hashed admin secret (admin API).

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use hookline_sdk::signature::{ADMIN_AUTH_HEADER, OWNER_HEADER, OWNER_TOKEN_HEADER};
use uuid::Uuid;

use crate::state::AppState;

/// Errors returned by the authentication extractors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
    #[error("invalid credentials")]
    InvalidCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingHeader(_) | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::InvalidHeader(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .ok_or(AuthError::MissingHeader(name))?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader(name))
}

// ---------------------------------------------------------------------------
// OwnerAuth
// ---------------------------------------------------------------------------

/// The authenticated owner of a registration API request.
///
/// # Header format
///
/// ```text
/// Hookline-Owner:       6f1c3a3e-2a7b-4d0e-9a55-0c1f1e2d3c4b
/// Hookline-Owner-Token: {plaintext token}
/// ```
pub struct OwnerAuth(pub Uuid);

impl FromRequestParts<AppState> for OwnerAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let owner_id = Uuid::parse_str(header(&parts.headers, OWNER_HEADER)?)
            .map_err(|_| AuthError::InvalidHeader(OWNER_HEADER))?;
        let token = header(&parts.headers, OWNER_TOKEN_HEADER)?;

        let auth = state.auth().await;
        if !auth.owners.verify(owner_id, token) {
            drop(auth);
            tracing::debug!(owner_id = %owner_id, "Rejected owner credentials");
            return Err(AuthError::InvalidCredentials);
        }
        drop(auth);

        Ok(OwnerAuth(owner_id))
    }
}

// ---------------------------------------------------------------------------
// AdminAuth
// ---------------------------------------------------------------------------

/// Marker extractor for admin API requests.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = header(&parts.headers, ADMIN_AUTH_HEADER)?;

        let auth = state.auth().await;
        let verified = auth.admin.verify_secret(secret);
        drop(auth);

        if verified {
            Ok(AdminAuth)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}
