use crate::identity::TokenGrant;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub postgres_url: Option<String>,
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            postgres_url: None,
            pool_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time from the first claim until the sale closes
    pub claim_window_secs: u64,
    /// How many times a finalization re-reads after losing a write race
    pub finalize_attempts: u32,
}

impl EngineConfig {
    pub fn claim_window(&self) -> Duration {
        Duration::from_secs(self.claim_window_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claim_window_secs: 24 * 60 * 60,
            finalize_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizerConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub concurrency: usize,
}

impl FinalizerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub finalizer: FinalizerConfig,
    pub log: LogConfig,
    pub identities: Vec<TokenGrant>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_owned(),
            store: StoreConfig::default(),
            engine: EngineConfig::default(),
            finalizer: FinalizerConfig::default(),
            log: LogConfig::default(),
            identities: vec![],
        }
    }
}

pub const ENV_PREFIX: &str = "CLAIMS_";

impl Config {
    /// Defaults, then the TOML file if given, then `CLAIMS_*` variables
    /// (`__` separates nested keys, e.g. `CLAIMS_ENGINE__CLAIM_WINDOW_SECS`)
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()
    }
}
