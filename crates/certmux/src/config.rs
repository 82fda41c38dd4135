//! Configuration loading and validation

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Upstream service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the certificate-checking upstream
    #[serde(default = "default_upstream_url")]
    pub url: String,
    /// Path of the endpoint that echoes the presented certificate
    #[serde(default = "default_echo_path")]
    pub echo_path: String,
    /// Name sent in the client header
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            echo_path: default_echo_path(),
            client_name: default_client_name(),
            skip_tls_verify: false,
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
        }
    }
}

/// Transport cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live transports
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Transport lifetime, measured from creation
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn to_cache_config(&self) -> certmux_core::CacheConfig {
        certmux_core::CacheConfig {
            capacity: self.capacity,
            ttl: Duration::from_secs(self.ttl_secs),
        }
    }
}

/// Client credential configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Directory holding `<identity>.pem` bundles
    #[serde(default = "default_credentials_dir")]
    pub dir: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            dir: default_credentials_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Either "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_upstream_url() -> String {
    "https://localhost:5001".to_string()
}

fn default_echo_path() -> String {
    "/ClientCert".to_string()
}

fn default_client_name() -> String {
    "certmux".to_string()
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

fn default_capacity() -> usize {
    10
}

fn default_ttl_secs() -> u64 {
    120
}

fn default_credentials_dir() -> PathBuf {
    PathBuf::from("./certs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        // Check if config file exists
        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            bail!("cache.capacity must be at least 1");
        }
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be greater than zero");
        }

        self.upstream_url()?;

        if !self.upstream.echo_path.starts_with('/') {
            bail!(
                "upstream.echo_path must start with '/': {}",
                self.upstream.echo_path
            );
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => bail!("logging.format must be \"pretty\" or \"json\", got {:?}", other),
        }
    }

    /// Parsed upstream base URL
    pub fn upstream_url(&self) -> Result<Url> {
        Url::parse(&self.upstream.url)
            .with_context(|| format!("Invalid upstream.url: {}", self.upstream.url))
    }
}
