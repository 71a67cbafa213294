//! Configuration resolution for the terminal bridge.
//!
//! Values follow a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONNECT_TIMEOUT` | 30s | Interactive session connect timeout in seconds |
//! | `SSH_DIAGNOSTIC_TIMEOUT` | 10s | Diagnostic session connect timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 15s | Per diagnostic command timeout in seconds |
//! | `METRICS_CACHE_TTL` | 300s | Metrics cache time-to-live in seconds |
//! | `BRIDGE_PORT` | 8080 | HTTP listen port |
//! | `SERVERS_FILE` | unset | JSON file with host credentials |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default interactive connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default diagnostic connection timeout in seconds
pub const DEFAULT_DIAGNOSTIC_TIMEOUT_SECS: u64 = 10;

/// Default per-command diagnostic timeout in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 15;

/// Default metrics cache TTL in seconds (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

pub const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub const DIAGNOSTIC_TIMEOUT_ENV_VAR: &str = "SSH_DIAGNOSTIC_TIMEOUT";
pub const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub const CACHE_TTL_ENV_VAR: &str = "METRICS_CACHE_TTL";
pub const PORT_ENV_VAR: &str = "BRIDGE_PORT";
pub const SERVERS_FILE_ENV_VAR: &str = "SERVERS_FILE";

/// Resolve a numeric setting with priority: parameter -> env var -> default.
///
/// Unparseable environment values are ignored.
fn resolve_u64(param: Option<u64>, env_var: &str, default: u64) -> u64 {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.trim().parse::<u64>()
    {
        return value;
    }

    default
}

/// Resolve the interactive connect timeout.
pub fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_u64(
        timeout_param,
        CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    ))
}

/// Resolve the diagnostic session connect timeout.
pub fn resolve_diagnostic_timeout(timeout_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_u64(
        timeout_param,
        DIAGNOSTIC_TIMEOUT_ENV_VAR,
        DEFAULT_DIAGNOSTIC_TIMEOUT_SECS,
    ))
}

/// Resolve the per-command diagnostic timeout.
pub fn resolve_command_timeout(timeout_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_u64(
        timeout_param,
        COMMAND_TIMEOUT_ENV_VAR,
        DEFAULT_COMMAND_TIMEOUT_SECS,
    ))
}

/// Resolve the metrics cache TTL.
pub fn resolve_cache_ttl(ttl_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_u64(ttl_param, CACHE_TTL_ENV_VAR, DEFAULT_CACHE_TTL_SECS))
}

/// Resolve the HTTP listen port. Out-of-range values fall back to the default.
pub fn resolve_port(port_param: Option<u16>) -> u16 {
    if let Some(port) = port_param {
        return port;
    }

    if let Ok(raw) = env::var(PORT_ENV_VAR)
        && let Ok(port) = raw.trim().parse::<u16>()
    {
        return port;
    }

    DEFAULT_PORT
}

/// Resolve the optional credentials file path.
pub fn resolve_servers_file(path_param: Option<PathBuf>) -> Option<PathBuf> {
    path_param.or_else(|| {
        env::var(SERVERS_FILE_ENV_VAR)
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
    })
}

/// Resolved runtime settings, injected into the service at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub connect_timeout: Duration,
    pub diagnostic_timeout: Duration,
    pub command_timeout: Duration,
    pub cache_ttl: Duration,
    pub port: u16,
    pub servers_file: Option<PathBuf>,
}

impl BridgeConfig {
    /// Build a configuration from environment variables and defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: resolve_connect_timeout(None),
            diagnostic_timeout: resolve_diagnostic_timeout(None),
            command_timeout: resolve_command_timeout(None),
            cache_ttl: resolve_cache_ttl(None),
            port: resolve_port(None),
            servers_file: resolve_servers_file(None),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            diagnostic_timeout: Duration::from_secs(DEFAULT_DIAGNOSTIC_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            port: DEFAULT_PORT,
            servers_file: None,
        }
    }
}
