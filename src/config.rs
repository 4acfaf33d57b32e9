//! Stash configuration.
//!
//! Loaded once by the application at startup and passed into each
//! `CryptoStash` it builds. Every field has a default, so an empty JSON
//! object is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::CryptoError;

/// Deployment-level settings for the credential stash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// File holding the base64 master secret on its first line.
    pub master_secret_path: PathBuf,
    /// Prefix of the per-tenant private container.
    pub container_prefix: String,
    /// Base path that every stash reference lives under.
    pub item_prefix: String,
    /// How many fresh UUIDs to try before giving up on allocation.
    pub reference_attempts: u32,
    /// Lifetime of generated temporary URLs.
    pub temp_url_ttl_secs: u64,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            master_secret_path: PathBuf::from("/etc/cryptostash/.stash_secret"),
            container_prefix: "nci-private-".to_string(),
            item_prefix: "stash".to_string(),
            reference_attempts: 2,
            temp_url_ttl_secs: 3600,
        }
    }
}

impl StashConfig {
    /// Read a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to read stash config");
            CryptoError::Config
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to parse stash config");
            CryptoError::Config
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The private container name for a tenant.
    pub fn container_for(&self, tenant_id: &str) -> String {
        format!("{}{}", self.container_prefix, tenant_id)
    }

    pub(crate) fn validate(&self) -> Result<(), CryptoError> {
        if self.reference_attempts == 0 {
            error!("reference_attempts must be at least 1");
            return Err(CryptoError::Config);
        }
        if self.item_prefix.is_empty() || self.item_prefix.contains('/') {
            error!(prefix = %self.item_prefix, "item_prefix must be a single path segment");
            return Err(CryptoError::Config);
        }
        Ok(())
    }
}
