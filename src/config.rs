//! Configuration management
//!
//! Handles loading and validating proxy configuration from TOML files.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::crypto::{CipherContext, CipherMethod, IvMode};
use crate::protocol::DEFAULT_WRITE_WATERMARK;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub shadowsocks: Option<ShadowsocksConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Which front the process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Plain SOCKS5 proxy dialing destinations directly
    #[default]
    Socks,
    /// SOCKS5 front whose upstream is the encrypted tunnel
    Local,
    /// Tunnel endpoint decrypting relay requests
    Server,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    /// Primary listen address
    pub bind_addr: SocketAddr,
    /// Additional listen addresses
    #[serde(default)]
    pub extra_bind_addrs: Vec<SocketAddr>,
    /// Bound on waiting for live connections during close
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_ms: u64,
    /// Bound on each wait for a negotiation message
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Bound on dialing an upstream
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Backpressure boundary of the negotiation write queue
    #[serde(default = "default_write_watermark")]
    pub write_watermark: usize,
    /// Number of worker threads (0 = auto)
    #[serde(default)]
    pub workers: usize,
}

impl ServerConfig {
    /// Get effective worker count (auto-detect if 0)
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    pub fn bind_addrs(&self) -> Vec<SocketAddr> {
        let mut addrs = vec![self.bind_addr];
        addrs.extend(self.extra_bind_addrs.iter().copied());
        addrs
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Credentials accepted by the SOCKS5 front
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

/// Tunnel cipher settings
#[derive(Debug, Clone, Deserialize)]
pub struct ShadowsocksConfig {
    /// Relay endpoint dialed in local mode
    #[serde(default)]
    pub remote_addr: Option<String>,
    pub password: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub iv_mode: IvMode,
}

impl ShadowsocksConfig {
    /// Resolve the method name and derive the shared cipher context
    pub fn cipher(&self) -> Result<CipherContext> {
        let method: CipherMethod = self.method.parse()?;
        Ok(CipherContext::new(method, &self.password).with_iv_mode(self.iv_mode))
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics server bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
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
fn default_kill_timeout() -> u64 { 3_000 }
fn default_idle_timeout() -> u64 { 90_000 }
fn default_connect_timeout() -> u64 { 3_000 }
fn default_write_watermark() -> usize { DEFAULT_WRITE_WATERMARK }
fn default_method() -> String { CipherMethod::Aes256Cfb.name().to_string() }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.idle_timeout_ms == 0 {
            bail!("idle_timeout_ms must be > 0");
        }
        if server.connect_timeout_ms == 0 {
            bail!("connect_timeout_ms must be > 0");
        }
        if server.write_watermark == 0 {
            bail!("write_watermark must be > 0");
        }

        for user in &self.auth.users {
            if user.username.is_empty() || user.username.len() > 255 {
                bail!("username must be 1..=255 bytes");
            }
            if user.password.len() > 255 {
                bail!("password of user {:?} exceeds 255 bytes", user.username);
            }
        }

        match server.mode {
            ServerMode::Socks => {}
            ServerMode::Local | ServerMode::Server => {
                let Some(tunnel) = &self.shadowsocks else {
                    bail!("[shadowsocks] section is required in {:?} mode", server.mode);
                };
                if tunnel.password.is_empty() {
                    bail!("shadowsocks password must not be empty");
                }
                tunnel
                    .method
                    .parse::<CipherMethod>()
                    .with_context(|| "Invalid shadowsocks method")?;
                if server.mode == ServerMode::Local && tunnel.remote_addr.is_none() {
                    bail!("shadowsocks remote_addr is required in local mode");
                }
            }
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            bail!("logging format must be \"json\" or \"pretty\"");
        }
        Ok(())
    }
}
