//! Configuration for the server, the caching proxy and the generation backend.
//!
//! Resolution order: built-in defaults, then the JSON config file
//! (`--config PATH`, or `~/.calcwire/config.json` when it exists), then
//! environment variables. CLI flags are applied last by the binary.
//!
//! ```json
//! {
//!   "server": { "port": 5555, "cache_size": 128 },
//!   "proxy": { "port": 5554, "upstream_port": 5555, "upstream_timeout_secs": 5 },
//!   "generation": { "model": "gpt-4.1-nano", "max_tokens": 150 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WireError};
use crate::protocol::DEFAULT_MAX_FRAME_BYTES;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_SERVER_PORT: u16 = 5555;
const DEFAULT_PROXY_PORT: u16 = 5554;
const DEFAULT_CACHE_SIZE: usize = 128;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 5;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    pub generation: GenerationConfig,
}

/// Connection server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (default: 127.0.0.1).
    pub host: String,
    /// Listen port (default: 5555).
    pub port: u16,
    /// Response cache capacity in entries.
    pub cache_size: usize,
    /// Longest accepted request line in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            cache_size: DEFAULT_CACHE_SIZE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Caching proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Connection server the proxy forwards cache misses to.
    pub upstream_host: String,
    pub upstream_port: u16,
    pub cache_size: usize,
    /// Bound on connect + write + read for one upstream exchange.
    pub upstream_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PROXY_PORT,
            upstream_host: DEFAULT_HOST.to_string(),
            upstream_port: DEFAULT_SERVER_PORT,
            cache_size: DEFAULT_CACHE_SIZE,
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ProxyConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

/// Generation backend settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// API key. Usually supplied through `OPENAI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-nano".to_string(),
            max_tokens: 150,
            timeout_secs: 60,
        }
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Config {
    /// Default config file location: `~/.calcwire/config.json`.
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".calcwire")
            .join("config.json")
    }

    /// Load configuration from `path` (which must exist) or, when `None`,
    /// from the default location if present. Environment overrides are
    /// applied and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let default_path = Self::path();
                if default_path.exists() {
                    Self::load_from(&default_path)?
                } else {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            WireError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| WireError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Apply `CALCWIRE_*` and `OPENAI_API_KEY` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = text("CALCWIRE_SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = text("CALCWIRE_SERVER_PORT") {
            self.server.port = parse_env("CALCWIRE_SERVER_PORT", &v)?;
        }
        if let Some(v) = text("CALCWIRE_SERVER_CACHE_SIZE") {
            self.server.cache_size = parse_env("CALCWIRE_SERVER_CACHE_SIZE", &v)?;
        }
        if let Some(v) = text("CALCWIRE_PROXY_HOST") {
            self.proxy.host = v;
        }
        if let Some(v) = text("CALCWIRE_PROXY_PORT") {
            self.proxy.port = parse_env("CALCWIRE_PROXY_PORT", &v)?;
        }
        if let Some(v) = text("CALCWIRE_PROXY_UPSTREAM_HOST") {
            self.proxy.upstream_host = v;
        }
        if let Some(v) = text("CALCWIRE_PROXY_UPSTREAM_PORT") {
            self.proxy.upstream_port = parse_env("CALCWIRE_PROXY_UPSTREAM_PORT", &v)?;
        }
        if let Some(v) = text("CALCWIRE_PROXY_CACHE_SIZE") {
            self.proxy.cache_size = parse_env("CALCWIRE_PROXY_CACHE_SIZE", &v)?;
        }
        if let Some(v) = text("CALCWIRE_PROXY_TIMEOUT_SECS") {
            self.proxy.upstream_timeout_secs = parse_env("CALCWIRE_PROXY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = text("OPENAI_API_KEY") {
            self.generation.api_key = Some(v);
        }
        if let Some(v) = text("CALCWIRE_GENERATION_BASE_URL") {
            self.generation.base_url = v;
        }
        if let Some(v) = text("CALCWIRE_GENERATION_MODEL") {
            self.generation.model = v;
        }
        Ok(())
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.server.cache_size == 0, "server.cache_size must be at least 1"),
            (self.proxy.cache_size == 0, "proxy.cache_size must be at least 1"),
            (self.server.max_frame_bytes == 0, "server.max_frame_bytes must be at least 1"),
            (self.proxy.max_frame_bytes == 0, "proxy.max_frame_bytes must be at least 1"),
            (
                self.proxy.upstream_timeout_secs == 0,
                "proxy.upstream_timeout_secs must be at least 1",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(WireError::Config((*message).to_string())),
            None => Ok(()),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| WireError::Config(format!("Invalid {key}='{value}': {e}")))
}
