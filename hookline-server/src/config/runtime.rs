//! Validated runtime configuration of the server.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use std::collections::HashMap;
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

fn verify_hash(hash: &str, plaintext: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Admin configuration with hashed secret.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// The argon2 hashed admin secret.
    pub secret_hash: String,
}

impl AdminConfig {
    pub fn new(secret_hash: String) -> Self {
        Self { secret_hash }
    }

    /// Verify a plaintext secret against the stored hash.
    pub fn verify_secret(&self, plaintext: &str) -> bool {
        verify_hash(&self.secret_hash, plaintext)
    }
}

/// Hashed API tokens of the owners allowed to register webhooks.
#[derive(Debug, Clone, Default)]
pub struct OwnerTokens {
    tokens: HashMap<Uuid, String>,
}

impl OwnerTokens {
    pub fn new(tokens: impl IntoIterator<Item = (Uuid, String)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// `true` if `owner_id` is configured and `plaintext` matches its token.
    pub fn verify(&self, owner_id: Uuid, plaintext: &str) -> bool {
        self.tokens
            .get(&owner_id)
            .is_some_and(|hash| verify_hash(hash, plaintext))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

/// The part of the configuration that can be reloaded via SIGHUP.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub admin: AdminConfig,
    pub owners: OwnerTokens,
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::{
        PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };

    fn hash(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_verify_secret() {
        let admin_config = AdminConfig::new(hash("test-password"));

        assert!(admin_config.verify_secret("test-password"));
        assert!(!admin_config.verify_secret("wrong-password"));
    }

    #[test]
    fn test_owner_tokens_are_scoped_to_their_owner() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let tokens = OwnerTokens::new([(alice, hash("alice-token"))]);

        assert!(tokens.verify(alice, "alice-token"));
        assert!(!tokens.verify(alice, "bob-token"));
        assert!(!tokens.verify(bob, "alice-token"));
    }
}
