//! Configuration management

use std::{
    collections::HashSet,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::auth::clients::{Client, hash_secret};
use crate::keys::MIN_KEY_BITS;
use crate::{Error, Result};

/// Longest token lifetime accepted by [`Config::validate`].
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` values.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Signing key configuration
    pub keys: KeysConfig,
    /// Token configuration
    pub tokens: TokensConfig,
    /// Login gate configuration
    pub login: LoginConfig,
    /// Clients seeded into the in-memory store at startup
    pub clients: Vec<ClientConfig>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // AUTH_KERNEL_TOKENS__TTL=5m → tokens.ttl
        figment = figment.merge(Env::prefixed("AUTH_KERNEL_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.keys.bits < MIN_KEY_BITS {
            return Err(Error::Config(format!(
                "keys.bits must be at least {MIN_KEY_BITS}, got {}",
                self.keys.bits
            )));
        }
        if self.tokens.ttl.is_zero() {
            return Err(Error::Config("tokens.ttl must be positive".to_string()));
        }
        if self.tokens.ttl > MAX_TOKEN_TTL {
            return Err(Error::Config(format!(
                "tokens.ttl must not exceed {}s",
                MAX_TOKEN_TTL.as_secs()
            )));
        }
        if self.tokens.issuer.trim().is_empty() {
            return Err(Error::Config("tokens.issuer must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for client in &self.clients {
            if client.client_id.is_empty() || client.tenant_id.is_empty() {
                return Err(Error::Config(
                    "clients need a client_id and a tenant_id".to_string(),
                ));
            }
            if client.secret.is_none() && client.secret_hash.is_none() {
                return Err(Error::Config(format!(
                    "client '{}' has neither secret nor secret_hash",
                    client.client_id
                )));
            }
            if !seen.insert(client.client_id.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate client_id '{}'",
                    client.client_id
                )));
            }
        }

        Ok(())
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Resolve the configured clients into store records.
    pub fn seed_clients(&self) -> Result<Vec<Client>> {
        self.clients.iter().map(ClientConfig::to_client).collect()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Signing key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// PEM file holding the signing key (default `~/.auth-kernel/signing_key.pem`)
    pub path: Option<String>,
    /// Modulus size for newly generated keys
    pub bits: usize,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            path: None,
            bits: MIN_KEY_BITS,
        }
    }
}

impl KeysConfig {
    /// Key file location with ~ expanded.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(PathBuf::from(expand_home(path)));
        }
        dirs::home_dir()
            .map(|home| home.join(".auth-kernel").join("signing_key.pem"))
            .ok_or_else(|| {
                Error::Config("No home directory; set keys.path explicitly".to_string())
            })
    }
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    /// Token and session lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// `iss` claim
    pub issuer: String,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            issuer: "auth-kernel".to_string(),
        }
    }
}

/// Login gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Login attempts per client id per minute (0 = unlimited)
    pub rate_limit_per_minute: u32,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 10,
        }
    }
}

/// A client declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier
    pub client_id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Plaintext secret (supports `env:VAR_NAME`); hashed at startup
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    /// Precomputed hash from `auth-kernel hash-secret`
    #[serde(default)]
    pub secret_hash: Option<String>,
}

impl ClientConfig {
    /// Build the store record, hashing a plaintext secret if needed.
    pub fn to_client(&self) -> Result<Client> {
        let secret_hash = match (&self.secret_hash, &self.secret) {
            (Some(hash), _) => hash.clone(),
            (None, Some(secret)) => hash_secret(&resolve_env(secret)?),
            (None, None) => {
                return Err(Error::Config(format!(
                    "client '{}' has neither secret nor secret_hash",
                    self.client_id
                )));
            }
        };
        Ok(Client {
            client_id: self.client_id.clone(),
            tenant_id: self.tenant_id.clone(),
            secret_hash,
        })
    }
}

/// Resolve `env:VAR_NAME` indirection. A missing variable is an error.
fn resolve_env(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name)
            .map_err(|_| Error::Config(format!("Environment variable {var_name} is not set"))),
        None => Ok(value.to_string()),
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~')
        && let Some(home) = dirs::home_dir()
    {
        return path.replacen('~', &home.display().to_string(), 1);
    }
    path.to_string()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string ("100ms", "30s", "15m", "1h", "7d")
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let number = |n: &str| n.parse::<u64>().map_err(|e| format!("invalid duration '{s}': {e}"));

        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins).map(|m| Duration::from_secs(m.saturating_mul(60)))
        } else if let Some(hours) = s.strip_suffix('h') {
            number(hours).map(|h| Duration::from_secs(h.saturating_mul(3600)))
        } else if let Some(days) = s.strip_suffix('d') {
            number(days).map(|d| Duration::from_secs(d.saturating_mul(86_400)))
        } else {
            // Assume seconds
            number(s).map(Duration::from_secs)
        }
    }
}
