use crate::auth::TokenGrant;
use crate::ingest::IngestionTimeouts;
use crate::storage::StorageDefaults;
use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageDefaults,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub mode: Mode,
    pub http: HttpConfig,
}

/// `development` exposes error detail in API responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestionConfig {
    pub write_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        let defaults = IngestionTimeouts::default();
        Self {
            write_timeout_secs: defaults.artifact_write.as_secs(),
            metadata_timeout_secs: defaults.metadata_write.as_secs(),
        }
    }
}

impl IngestionConfig {
    pub fn timeouts(&self) -> IngestionTimeouts {
        IngestionTimeouts {
            artifact_write: Duration::from_secs(self.write_timeout_secs),
            metadata_write: Duration::from_secs(self.metadata_timeout_secs),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,
}

impl Config {
    /// Load `path` (any format the `config` crate knows), then apply
    /// `CONSULT__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CONSULT").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).as_ref())
    }

    pub fn is_development(&self) -> bool {
        self.service.mode == Mode::Development
    }
}
