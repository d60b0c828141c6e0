//! Configuration management for zk-pass relying parties.

use crate::types::{AttestationConveyance, UserVerificationRequirement};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default ceremony lifetime in milliseconds.
pub const DEFAULT_CEREMONY_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub relying_party: RelyingPartyConfig,
    #[serde(default)]
    pub ceremony: CeremonyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub zk: ZkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelyingPartyConfig {
    /// Effective domain the credentials are scoped to
    pub id: String,
    pub name: String,
    /// Origins accepted in client data, e.g. `https://login.example.com`
    pub origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CeremonyConfig {
    pub timeout_ms: u64,
    pub user_verification: UserVerificationRequirement,
    pub attestation: AttestationConveyance,
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CEREMONY_TIMEOUT_MS,
            user_verification: UserVerificationRequirement::Preferred,
            attestation: AttestationConveyance::None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file. In-memory storage when unset.
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZkConfig {
    /// Compressed Groth16 verifying key. Proofs are rejected when unset.
    pub verifying_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from process environment variables.
    ///
    /// `RP_ID` is required; everything else falls back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let id = lookup("RP_ID").context("RP_ID is not set")?;
        let name = lookup("RP_DISPLAY_NAME").unwrap_or_else(|| id.clone());
        let origins = match lookup("RP_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect(),
            None => vec![format!("https://{}", id)],
        };

        let mut ceremony = CeremonyConfig::default();
        if let Some(raw) = lookup("CEREMONY_TIMEOUT_MS") {
            ceremony.timeout_ms = raw
                .parse()
                .with_context(|| format!("invalid CEREMONY_TIMEOUT_MS: {}", raw))?;
        }

        let mut logging = LoggingConfig::default();
        if let Some(level) = lookup("LOG_LEVEL") {
            logging.level = level;
        }
        if let Some(raw) = lookup("LOG_JSON") {
            logging.json = matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        let config = Self {
            relying_party: RelyingPartyConfig { id, name, origins },
            ceremony,
            storage: StorageConfig {
                database_path: lookup("DATABASE_PATH").map(PathBuf::from),
            },
            zk: ZkConfig {
                verifying_key_path: lookup("ZK_VERIFYING_KEY_PATH").map(PathBuf::from),
            },
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.relying_party.id.trim().is_empty() {
            bail!("relying party id must not be empty");
        }
        if self.relying_party.origins.is_empty() {
            bail!("at least one relying party origin is required");
        }
        if self.ceremony.timeout_ms == 0 {
            bail!("ceremony timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            relying_party: RelyingPartyConfig {
                id: "localhost".to_string(),
                name: "zk-pass".to_string(),
                origins: vec!["http://localhost:8080".to_string()],
            },
            ceremony: CeremonyConfig::default(),
            storage: StorageConfig::default(),
            zk: ZkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
