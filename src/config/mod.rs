// Configuration Management Module
// Handles graceful.toml loading, defaults, and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GracefulConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// 0 picks an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Disable Nagle's algorithm on accepted connections
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    /// Pending connection queue length passed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long a drain may wait for in-flight requests before force-closing
    /// them. Unset means wait as long as it takes.
    #[serde(default)]
    pub drain_timeout_ms: Option<u64>,
}

// Default value functions
fn default_bind_addr() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_backlog() -> i32 { 1024 }
fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            tcp_nodelay: default_true(),
            backlog: default_backlog(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_addr, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.bind_addr, self.port))
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

impl GracefulConfig {
    /// Load configuration from file or use defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let contents = std::fs::read_to_string(path)
                .context("Failed to read configuration file")?;

            toml::from_str::<GracefulConfig>(&contents)
                .context("Failed to parse configuration file")?
        } else {
            warn!(path = %path.display(), "Configuration file not found, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.server.socket_addr()?;

        if self.server.backlog < 1 {
            anyhow::bail!("Listen backlog must be at least 1");
        }

        if self.shutdown.drain_timeout_ms == Some(0) {
            anyhow::bail!("Drain timeout must be greater than 0 (omit it to wait indefinitely)");
        }

        Ok(())
    }
}
