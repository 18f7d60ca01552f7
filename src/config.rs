//! Hub address and client configuration.
//!
//! Settings come from `<config dir>/fxhub/config.json` when it exists, then
//! from environment overrides:
//!
//! - `FXHUB_ADDR` - hub address as `host:port`
//! - `FXHUB_IO_TIMEOUT` - request/response timeout in seconds (`0` disables)
//! - `FXHUB_CONFIG_DIR` - directory holding `config.json`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::constants::{DEFAULT_HOST, DEFAULT_PORT};
use crate::error::HubError;

/// Name of the config file inside the config directory.
const CONFIG_FILE: &str = "config.json";

/// Configuration for a hub client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct HubConfig {
    /// Hub host name or IP address.
    pub host: String,
    /// Hub TCP port.
    pub port: u16,
    /// Read/write timeout for request/response calls, in seconds.
    ///
    /// The event stream never times out; it may legitimately stay quiet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_timeout_secs: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            io_timeout_secs: None,
        }
    }
}

impl HubConfig {
    /// Build a config for `host:port` with no timeout.
    ///
    /// IPv6 hosts may be bracketed: `[::1]:10001`.
    ///
    /// # Errors
    ///
    /// `HubError::Config` if the address has no port, an empty host, or a
    /// port outside `1..=65535`.
    pub fn from_addr(addr: &str) -> Result<Self, HubError> {
        let addr = addr.trim();
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| HubError::Config(format!("missing port in address {addr:?}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(HubError::Config(format!("missing host in address {addr:?}")));
        }
        let port: u16 = port
            .parse()
            .map_err(|e| HubError::Config(format!("invalid port in address {addr:?}: {e}")))?;
        if port == 0 {
            return Err(HubError::Config(format!("port must be non-zero in {addr:?}")));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            io_timeout_secs: None,
        })
    }

    /// Address as `host:port`.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Request/response timeout, if one is configured.
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Directory holding the config file.
    ///
    /// `FXHUB_CONFIG_DIR` wins; otherwise the platform config directory
    /// (e.g. `~/.config/fxhub` on Linux).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("FXHUB_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("fxhub"))
    }

    /// Load from the config file if present, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Fails if the config file exists but cannot be read or parsed, or an
    /// override is invalid.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            log::debug!("[Config] No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a specific file, without env overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid config.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        log::debug!("[Config] Loaded {} ({})", path.display(), config.addr());
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the environment).
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("FXHUB_ADDR") {
            let parsed = Self::from_addr(&addr).context("Invalid FXHUB_ADDR")?;
            self.host = parsed.host;
            self.port = parsed.port;
        }

        if let Some(timeout) = lookup("FXHUB_IO_TIMEOUT") {
            let secs = timeout
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid FXHUB_IO_TIMEOUT {timeout:?}"))?;
            self.io_timeout_secs = Some(secs);
        }

        Ok(())
    }
}
