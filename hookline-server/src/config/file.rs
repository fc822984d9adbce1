//! TOML file configuration structures.
//!
//! These structs directly map to the `hookline-config.toml` file format.

use hookline_core::channels::CHANNEL_LOGIC_VERSION;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use uuid::Uuid;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub owners: Vec<OwnerConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Admin configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// The admin secret. If this is plaintext (doesn't start with `$argon2`),
    /// it will be hashed and the config file will be rewritten.
    pub secret: String,
}

/// Pipeline tuning. Every field falls back to the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_window_ms: Option<u64>,
    pub processor_concurrency: Option<usize>,
    pub webhook_concurrency: Option<usize>,
    pub delivery_concurrency: Option<usize>,
    pub delivery_timeout_secs: Option<u64>,
    pub verification_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

/// Channel naming rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Bump whenever the composite definitions change so stored bindings are
    /// recomputed at startup.
    #[serde(default = "default_logic_version")]
    pub logic_version: i32,
    /// Publishes on channels with these prefixes never reach webhooks.
    #[serde(default)]
    pub internal_prefixes: Vec<String>,
    /// Composite channel name to member channel names.
    #[serde(default)]
    pub composites: BTreeMap<String, Vec<String>>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            logic_version: default_logic_version(),
            internal_prefixes: Vec::new(),
            composites: BTreeMap::new(),
        }
    }
}

fn default_logic_version() -> i32 {
    CHANNEL_LOGIC_VERSION
}

/// An owner allowed to use the registration API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerConfig {
    pub id: Uuid,
    /// API token, hashed on first load like the admin secret.
    pub token: String,
}

pub(crate) fn is_hashed(secret: &str) -> bool {
    secret.starts_with("$argon2")
}

impl FileConfig {
    /// Check if the admin secret is already hashed (argon2 format).
    pub fn is_admin_secret_hashed(&self) -> bool {
        is_hashed(&self.admin.secret)
    }

    /// Whether every secret in the file is already hashed.
    pub fn is_fully_hashed(&self) -> bool {
        self.is_admin_secret_hashed() && self.owners.iter().all(|o| is_hashed(&o.token))
    }
}
