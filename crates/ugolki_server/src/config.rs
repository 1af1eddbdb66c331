//! Server configuration.
//!
//! Values come from an optional TOML file, then environment variables, then
//! command-line flags, each layer overriding the previous one.

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Environment variable for the bind host.
pub const ENV_HOST: &str = "UGOLKI_HOST";
/// Environment variable for the bind port.
pub const ENV_PORT: &str = "UGOLKI_PORT";
/// Environment variable for the SQLite database path.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Environment variable for the token signing key.
pub const ENV_SECRET: &str = "JWT_SECRET_KEY";
/// Environment variable for the agent reply delay in milliseconds.
pub const ENV_AGENT_DELAY_MS: &str = "UGOLKI_AGENT_DELAY_MS";
/// Environment variable for the token lifetime in seconds.
pub const ENV_TOKEN_TTL_SECS: &str = "UGOLKI_TOKEN_TTL_SECS";

const DEV_SECRET: &str = "ugolki-dev-secret-key-not-for-production";

/// Settings for the match server.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    host: String,

    /// Port to bind to.
    #[serde(default = "default_port")]
    port: u16,

    /// SQLite database path.
    #[serde(default = "default_database_url")]
    database_url: String,

    /// Token signing key.
    #[serde(default = "default_secret")]
    secret_key: String,

    /// Pause before the automated opponent replies.
    #[serde(default = "default_agent_delay_ms")]
    agent_delay_ms: u64,

    /// Token lifetime.
    #[serde(default = "default_token_ttl_secs")]
    token_ttl_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_database_url() -> String {
    "ugolki.db".to_string()
}

fn default_secret() -> String {
    DEV_SECRET.to_string()
}

fn default_agent_delay_ms() -> u64 {
    500
}

fn default_token_ttl_secs() -> u64 {
    60 * 60 * 24 * 7
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_url: default_database_url(),
            secret_key: default_secret(),
            agent_delay_ms: default_agent_delay_ms(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid TOML for this type.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;
        config.token_ttl()?;
        info!(host = %config.host, port = config.port, "Config loaded");
        Ok(config)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric variable does not parse.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by the `ENV_*` names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric value does not parse.
    #[instrument(skip(self, lookup))]
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = parse_number(ENV_PORT, &port)?;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(secret) = lookup(ENV_SECRET) {
            self.secret_key = secret;
        }
        if let Some(delay) = lookup(ENV_AGENT_DELAY_MS) {
            self.agent_delay_ms = parse_number(ENV_AGENT_DELAY_MS, &delay)?;
        }
        if let Some(ttl) = lookup(ENV_TOKEN_TTL_SECS) {
            self.token_ttl_secs = parse_number(ENV_TOKEN_TTL_SECS, &ttl)?;
        }
        self.token_ttl()?;

        if self.secret_key == DEV_SECRET {
            warn!("Using the development signing key; set {} in production", ENV_SECRET);
        }
        Ok(self)
    }

    /// Overrides the bind address.
    pub fn with_bind(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Overrides the database path.
    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        if let Some(url) = database_url {
            self.database_url = url;
        }
        self
    }

    /// Pause before the automated opponent replies.
    pub fn agent_delay(&self) -> Duration {
        Duration::from_millis(self.agent_delay_ms)
    }

    /// Token lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the lifetime is beyond what a timestamp can
    /// hold.
    pub fn token_ttl(&self) -> Result<chrono::TimeDelta, ConfigError> {
        i64::try_from(self.token_ttl_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .ok_or_else(|| {
                ConfigError::new(format!(
                    "Token lifetime of {} seconds is out of range",
                    self.token_ttl_secs
                ))
            })
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[track_caller]
fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::new(format!("Invalid {} '{}': {}", key, value, e)))
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}
