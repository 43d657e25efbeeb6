//! Database credential resolution.
//!
//! Credentials arrive as a flat key/value mapping
//! (`host`, `port`, `dbname`, `username`, `password`) from one of several
//! providers: process environment, a JSON document on disk, or a HashiCorp
//! Vault KV v2 secret. A missing or malformed secret is a hard error, never
//! an empty mapping.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Flat key/value secret payload.
pub type SecretMap = Map<String, Value>;

/// Structured error types for secret retrieval.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret is missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("secret key '{key}' is malformed: {reason}")]
    Malformed { key: &'static str, reason: String },

    #[error("secret store rejected credentials: {0}")]
    Unauthorized(String),

    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    #[error("secret payload is not a JSON object: {0}")]
    Parse(String),
}

/// Connection parameters for the time-series database.
#[derive(Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DbCredentials {
    /// Build credentials from a flat secret mapping.
    ///
    /// `port` may be a JSON number or a numeric string.
    pub fn from_map(map: &SecretMap) -> Result<Self, SecretError> {
        Ok(Self {
            host: required_str(map, "host")?,
            port: required_port(map)?,
            dbname: required_str(map, "dbname")?,
            username: required_str(map, "username")?,
            password: required_str(map, "password")?,
        })
    }

    /// Same server and login, different database.
    pub fn with_dbname(&self, dbname: &str) -> Self {
        Self {
            dbname: dbname.to_string(),
            ..self.clone()
        }
    }
}

fn required_str(map: &SecretMap, key: &'static str) -> Result<String, SecretError> {
    match map.get(key) {
        None | Some(Value::Null) => Err(SecretError::MissingKey(key)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(SecretError::Malformed {
            key,
            reason: "empty string".into(),
        }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(SecretError::Malformed {
            key,
            reason: format!("expected string, got {other}"),
        }),
    }
}

fn required_port(map: &SecretMap) -> Result<u16, SecretError> {
    let malformed = |reason: String| SecretError::Malformed { key: "port", reason };
    match map.get("port") {
        None | Some(Value::Null) => Err(SecretError::MissingKey("port")),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| malformed(format!("{n} is not a valid port"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .map_err(|e| malformed(format!("'{s}': {e}"))),
        Some(other) => Err(malformed(format!("expected number, got {other}"))),
    }
}

/// Source of database credentials.
pub trait SecretProvider {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Retrieve the raw key/value secret.
    fn fetch(&self) -> Result<SecretMap, SecretError>;

    fn credentials(&self) -> Result<DbCredentials, SecretError> {
        let map = self.fetch()?;
        debug!(provider = self.name(), keys = map.len(), "secret retrieved");
        DbCredentials::from_map(&map)
    }
}

// ── Environment ──────────────────────────────────────────────────────

/// Credentials from `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`.
///
/// Host, port, database and user fall back to `localhost`, `5432`,
/// `postgres` and `postgres`; the password has no default.
pub struct EnvSecrets {
    vars: HashMap<String, String>,
}

impl EnvSecrets {
    pub fn from_process_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl SecretProvider for EnvSecrets {
    fn name(&self) -> &str {
        "environment"
    }

    fn fetch(&self) -> Result<SecretMap, SecretError> {
        let mut map = SecretMap::new();
        for (key, var, default) in [
            ("host", "DB_HOST", Some("localhost")),
            ("port", "DB_PORT", Some("5432")),
            ("dbname", "DB_NAME", Some("postgres")),
            ("username", "DB_USER", Some("postgres")),
            ("password", "DB_PASSWORD", None),
        ] {
            let value = self.vars.get(var).map(String::as_str).or(default);
            if let Some(value) = value {
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        Ok(map)
    }
}

// ── JSON file ────────────────────────────────────────────────────────

/// Credentials from a JSON object on disk, e.g. an exported cloud secret string.
pub struct JsonFileSecrets {
    path: PathBuf,
}

impl JsonFileSecrets {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse a secret string into a flat mapping.
pub fn parse_secret_string(content: &str) -> Result<SecretMap, SecretError> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SecretError::Parse(format!("found {}", json_kind(&other)))),
        Err(e) => Err(SecretError::Parse(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl SecretProvider for JsonFileSecrets {
    fn name(&self) -> &str {
        "json_file"
    }

    fn fetch(&self) -> Result<SecretMap, SecretError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SecretError::NotFound(self.path.display().to_string())
            } else {
                SecretError::Unavailable(format!("{}: {e}", self.path.display()))
            }
        })?;
        parse_secret_string(&content)
    }
}

// ── Vault KV v2 ──────────────────────────────────────────────────────

/// Credentials from a HashiCorp Vault KV v2 secret.
pub struct VaultSecrets {
    client: reqwest::blocking::Client,
    addr: String,
    token: String,
    mount: String,
    path: String,
}

impl VaultSecrets {
    pub fn new(
        addr: impl Into<String>,
        token: impl Into<String>,
        mount: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self, SecretError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SecretError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            addr: addr.into(),
            token: token.into(),
            mount: mount.into(),
            path: path.into(),
        })
    }

    /// `{addr}/v1/{mount}/data/{path}`
    fn secret_url(&self) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.addr.trim_end_matches('/'),
            self.mount.trim_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// Pull the inner key/value payload out of a KV v2 read response.
fn unwrap_kv2(body: Value) -> Result<SecretMap, SecretError> {
    match body.get("data").and_then(|d| d.get("data")) {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(SecretError::Parse(format!(
            "data.data is {}",
            json_kind(other)
        ))),
        None => Err(SecretError::Parse("response has no data.data field".into())),
    }
}

impl SecretProvider for VaultSecrets {
    fn name(&self) -> &str {
        "vault"
    }

    fn fetch(&self) -> Result<SecretMap, SecretError> {
        let url = self.secret_url();
        let resp = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .map_err(|e| SecretError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound(format!("{}/{}", self.mount, self.path)));
        }
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(SecretError::Unauthorized(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(SecretError::Unavailable(format!("HTTP {status} from {url}")));
        }

        let body: Value = resp
            .json()
            .map_err(|e| SecretError::Parse(format!("invalid JSON from vault: {e}")))?;
        unwrap_kv2(body)
    }
}
