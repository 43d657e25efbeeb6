//! Sync configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file at all) yields the
//! stock setup: one-minute bars for five US stocks, 60 days of required
//! history fetched in 30-day requests, credentials from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use barsync_core::data::{GatewayAddress, RetryPolicy};
use barsync_core::domain::{validate_instruments, Granularity, Instrument, InstrumentError};
use barsync_core::secrets::{
    EnvSecrets, JsonFileSecrets, SecretError, SecretProvider, VaultSecrets,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "barsync.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid instrument list: {0}")]
    Instruments(#[from] InstrumentError),
}

/// Top-level sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Schema namespace holding every instrument table.
    pub schema: String,
    /// Table-name prefix identifying the data source.
    pub source_prefix: String,
    pub granularity: Granularity,
    pub policy: SyncPolicy,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub secrets: SecretsConfig,
    pub instruments: Vec<Instrument>,
}

/// History and request-shaping policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncPolicy {
    /// Minimum history depth the store must hold before incremental sync applies.
    pub required_history_days: u32,
    /// Largest lookback the gateway accepts in one request.
    pub max_request_days: u32,
    /// Incremental sync refuses to bridge gaps older than this.
    pub staleness_limit_days: u32,
    pub trades_only: bool,
    pub regular_hours_only: bool,
    /// Attempts per fetch window, reconnecting between attempts.
    pub fetch_attempts: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            required_history_days: 60,
            max_request_days: 30,
            staleness_limit_days: 30,
            trades_only: true,
            regular_hours_only: true,
            fetch_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub connect_attempts: u32,
    pub connect_delay_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let addr = GatewayAddress::default();
        Self {
            host: addr.host,
            port: addr.port,
            client_id: addr.client_id,
            connect_attempts: 5,
            connect_delay_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn address(&self) -> GatewayAddress {
        GatewayAddress {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id,
        }
    }

    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_attempts,
            Duration::from_secs(self.connect_delay_secs),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Convert new tables to TimescaleDB hypertables with this chunk interval.
    pub hypertable_chunk_interval: Option<String>,
    /// Maintenance database used by `init` to create the target database.
    pub admin_database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hypertable_chunk_interval: None,
            admin_database: "postgres".to_string(),
        }
    }
}

/// Where database credentials come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SecretsConfig {
    /// `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`
    #[default]
    Env,
    /// JSON object on disk.
    File { path: PathBuf },
    /// HashiCorp Vault KV v2. The token falls back to `VAULT_TOKEN`.
    Vault {
        addr: String,
        #[serde(default = "default_vault_mount")]
        mount: String,
        path: String,
        #[serde(default)]
        token: Option<String>,
    },
}

fn default_vault_mount() -> String {
    "secret".to_string()
}

impl SecretsConfig {
    pub fn provider(&self) -> Result<Box<dyn SecretProvider>, SecretError> {
        match self {
            SecretsConfig::Env => Ok(Box::new(EnvSecrets::from_process_env())),
            SecretsConfig::File { path } => Ok(Box::new(JsonFileSecrets::new(path.clone()))),
            SecretsConfig::Vault {
                addr,
                mount,
                path,
                token,
            } => {
                let token = token
                    .clone()
                    .or_else(|| std::env::var("VAULT_TOKEN").ok())
                    .ok_or_else(|| {
                        SecretError::Unauthorized(
                            "no vault token: set secrets.token or VAULT_TOKEN".into(),
                        )
                    })?;
                Ok(Box::new(VaultSecrets::new(
                    addr.as_str(),
                    token,
                    mount.as_str(),
                    path.as_str(),
                )?))
            }
        }
    }
}

/// AAPL and MSFT on NASDAQ; LUV, SHEL and WMT on NYSE; all in USD.
pub fn default_instruments() -> Vec<Instrument> {
    vec![
        Instrument::us_stock("AAPL", "NASDAQ"),
        Instrument::us_stock("MSFT", "NASDAQ"),
        Instrument::us_stock("LUV", "NYSE"),
        Instrument::us_stock("SHEL", "NYSE"),
        Instrument::us_stock("WMT", "NYSE"),
    ]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema: "market_data".to_string(),
            source_prefix: "ib".to_string(),
            granularity: Granularity::OneMinute,
            policy: SyncPolicy::default(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            secrets: SecretsConfig::default(),
            instruments: default_instruments(),
        }
    }
}

impl SyncConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path, else `barsync.toml` if present, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema.trim().is_empty() {
            return Err(ConfigError::Invalid("schema must not be empty".into()));
        }
        if self.source_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("source_prefix must not be empty".into()));
        }

        let p = &self.policy;
        for (name, value) in [
            ("policy.required_history_days", p.required_history_days),
            ("policy.max_request_days", p.max_request_days),
            ("policy.staleness_limit_days", p.staleness_limit_days),
            ("policy.fetch_attempts", p.fetch_attempts),
            ("gateway.connect_attempts", self.gateway.connect_attempts),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if p.max_request_days > p.required_history_days {
            return Err(ConfigError::Invalid(format!(
                "policy.max_request_days ({}) exceeds policy.required_history_days ({})",
                p.max_request_days, p.required_history_days
            )));
        }
        // An incremental catch-up is a single request of up to
        // `staleness_limit_days` plus the partial day.
        if p.staleness_limit_days > p.max_request_days {
            return Err(ConfigError::Invalid(format!(
                "policy.staleness_limit_days ({}) exceeds policy.max_request_days ({})",
                p.staleness_limit_days, p.max_request_days
            )));
        }

        validate_instruments(&self.instruments, &self.source_prefix, self.granularity)?;
        Ok(())
    }

    /// Restrict to instruments whose symbol is in `symbols` (case-insensitive).
    ///
    /// An empty filter selects everything. Unknown symbols are an error.
    pub fn select(&self, symbols: &[String]) -> Result<Vec<Instrument>, ConfigError> {
        if symbols.is_empty() {
            return Ok(self.instruments.clone());
        }
        for wanted in symbols {
            if !self
                .instruments
                .iter()
                .any(|i| i.symbol.eq_ignore_ascii_case(wanted))
            {
                return Err(ConfigError::Invalid(format!(
                    "symbol '{wanted}' is not in the configured instrument list"
                )));
            }
        }
        Ok(self
            .instruments
            .iter()
            .filter(|i| symbols.iter().any(|s| i.symbol.eq_ignore_ascii_case(s)))
            .cloned()
            .collect())
    }

    /// Storage table for an instrument under this config.
    pub fn table_for(&self, instrument: &Instrument) -> String {
        instrument.table_name(&self.source_prefix, self.granularity)
    }
}
