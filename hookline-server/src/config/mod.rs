//! Configuration module for hookline-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables. Also handles admin secret and owner token
//! hashing.

pub mod file;
pub mod runtime;

use crate::config::file::{ChannelsConfig, FileConfig, PipelineConfig as FilePipelineConfig, is_hashed};
use crate::config::runtime::{AdminConfig, AuthConfig, OwnerTokens, ServerConfig};
use hookline_core::channels::ChannelRegistry;
use hookline_core::config::PipelineConfig;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("password hashing error: {0}")]
    HashError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub pipeline: PipelineConfig,
    pub registry: ChannelRegistry,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Hash plaintext secrets and tokens (and rewrite the file)
    /// 5. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        self.validate(&file_config)?;

        if !file_config.is_fully_hashed() {
            self.hash_plaintext(&mut file_config)?;
            self.rewrite_config(&file_config)?;
            tracing::info!("Plaintext secrets hashed and config file updated");
        }

        Ok(self.build_loaded_config(file_config))
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for owner in &config.owners {
            if !seen.insert(owner.id) {
                return Err(ConfigError::ValidationError(format!(
                    "owner {} is configured more than once",
                    owner.id
                )));
            }
        }
        if config.channels.logic_version < 1 {
            return Err(ConfigError::ValidationError(
                "channels.logic_version must be at least 1".to_string(),
            ));
        }
        let pipeline = &config.pipeline;
        let concurrency = [
            ("processor_concurrency", pipeline.processor_concurrency),
            ("webhook_concurrency", pipeline.webhook_concurrency),
            ("delivery_concurrency", pipeline.delivery_concurrency),
        ];
        for (name, value) in concurrency {
            if value == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "pipeline.{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    fn hash_plaintext(&self, config: &mut FileConfig) -> Result<(), ConfigError> {
        if !is_hashed(&config.admin.secret) {
            config.admin.secret = self.hash_secret(&config.admin.secret)?;
        }
        for owner in &mut config.owners {
            if !is_hashed(&owner.token) {
                owner.token = self.hash_secret(&owner.token)?;
            }
        }
        Ok(())
    }

    fn hash_secret(&self, plaintext: &str) -> Result<String, ConfigError> {
        use argon2::{
            Argon2, PasswordHasher,
            password_hash::{SaltString, rand_core::OsRng},
        };

        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ConfigError::HashError(e.to_string()))
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }

    fn build_loaded_config(&self, file_config: FileConfig) -> LoadedConfig {
        let owners = OwnerTokens::new(
            file_config
                .owners
                .into_iter()
                .map(|owner| (owner.id, owner.token)),
        );

        LoadedConfig {
            server: ServerConfig {
                listen: file_config.server.listen,
            },
            auth: AuthConfig {
                admin: AdminConfig::new(file_config.admin.secret),
                owners,
            },
            pipeline: convert_pipeline(file_config.pipeline),
            registry: convert_channels(file_config.channels),
        }
    }
}

fn convert_pipeline(p: FilePipelineConfig) -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        batch_window: p
            .batch_window_ms
            .map_or(defaults.batch_window, Duration::from_millis),
        processor_concurrency: p
            .processor_concurrency
            .unwrap_or(defaults.processor_concurrency),
        webhook_concurrency: p.webhook_concurrency.unwrap_or(defaults.webhook_concurrency),
        delivery_concurrency: p
            .delivery_concurrency
            .unwrap_or(defaults.delivery_concurrency),
        delivery_timeout: p
            .delivery_timeout_secs
            .map_or(defaults.delivery_timeout, Duration::from_secs),
        verification_timeout: p
            .verification_timeout_secs
            .map_or(defaults.verification_timeout, Duration::from_secs),
        user_agent: p.user_agent.unwrap_or(defaults.user_agent),
        ..defaults
    }
}

fn convert_channels(c: ChannelsConfig) -> ChannelRegistry {
    let registry = c
        .internal_prefixes
        .into_iter()
        .fold(ChannelRegistry::new(c.logic_version), |registry, prefix| {
            registry.with_internal_prefix(prefix)
        });
    c.composites
        .into_iter()
        .fold(registry, |registry, (name, members)| {
            registry.with_composite(name, members)
        })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
