//! Client configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use validator::Validate;

use crate::error::{AccessGrantError, Result};
use crate::GCONSENT_SCHEMA;

/// Access Grant client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AccessGrantConfig {
    /// Default issuer for issuance and queries
    pub issuer: Url,

    /// Consent vocabulary used in issued credentials
    #[serde(default = "default_schema")]
    #[validate(url)]
    pub schema: String,

    /// How long discovered service metadata stays fresh
    #[serde(default = "default_metadata_cache_ttl", with = "humantime_serde")]
    pub metadata_cache_ttl: Duration,

    /// Maximum number of issuers kept in the metadata cache
    #[serde(default = "default_metadata_cache_size")]
    #[validate(range(min = 1, max = 10000))]
    pub metadata_cache_size: usize,

    /// Per-request timeout applied to every call
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header sent with every call
    #[serde(default = "default_user_agent")]
    #[validate(length(min = 1, max = 255))]
    pub user_agent: String,
}

fn default_schema() -> String {
    GCONSENT_SCHEMA.to_string()
}

fn default_metadata_cache_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_metadata_cache_size() -> usize {
    100
}

fn default_user_agent() -> String {
    format!("access-grant/{}", env!("CARGO_PKG_VERSION"))
}

impl AccessGrantConfig {
    /// Create a configuration for `issuer` with default settings
    pub fn new(issuer: Url) -> Self {
        Self {
            issuer,
            schema: default_schema(),
            metadata_cache_ttl: default_metadata_cache_ttl(),
            metadata_cache_size: default_metadata_cache_size(),
            request_timeout: None,
            user_agent: default_user_agent(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AccessGrantConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AccessGrantError::Config(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate field ranges and the consent schema
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AccessGrantError::Config(format!("Invalid config: {}", e)))?;

        if self.schema.trim_end_matches('/') != GCONSENT_SCHEMA {
            return Err(AccessGrantError::Config(format!(
                "Unsupported schema: {}",
                self.schema
            )));
        }

        Ok(())
    }
}
