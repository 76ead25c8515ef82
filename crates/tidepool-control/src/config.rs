//! Client configuration.
//!
//! Built from defaults, optionally overridden by a TOML file. The config
//! supplies the default host list used when a request names no targets,
//! the default port appended to bare host names, and the timing knobs for
//! the retry engine.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::candidates::MAX_MS_CANDIDATES;
use crate::error::ControlError;

/// Port the control-plane servers listen on unless told otherwise.
pub const DEFAULT_PORT: u16 = 10001;

/// System name stamped on requests when none is configured.
pub const DEFAULT_SYSTEM_NAME: &str = "tidepool";

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    /// Name of the system the client talks to.
    pub name: String,
    /// Port appended to host list entries that don't carry one.
    pub port: u16,
    /// Default request targets. Management requests sample from this list.
    pub hostlist: Vec<String>,
    /// Overall time budget for a request when the caller sets none.
    pub request_timeout_ms: u64,
    /// Maximum number of hosts contacted concurrently by one dispatch.
    pub max_inflight: usize,
    pub transport: TransportConfig,
    pub retry: RetryConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SYSTEM_NAME.to_string(),
            port: DEFAULT_PORT,
            hostlist: vec!["localhost".to_string()],
            request_timeout_ms: 5 * 60 * 1000,
            max_inflight: 256,
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// How long to wait for a TCP connection to be established.
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Retry settings for management-service requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// First backoff delay; doubled on every further attempt.
    pub base_interval_ms: u64,
    /// Upper bound for the backoff delay.
    pub max_interval_ms: u64,
    /// Time budget for a single attempt. Zero means attempts are bounded
    /// only by the overall request deadline.
    pub attempt_timeout_ms: u64,
    /// Number of hosts sampled from the host list to find the leader.
    pub max_candidates: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 250,
            max_interval_ms: 5_000,
            attempt_timeout_ms: 30_000,
            max_candidates: MAX_MS_CANDIDATES,
        }
    }
}

impl RetryConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_ms > 0).then(|| Duration::from_millis(self.attempt_timeout_ms))
    }
}

impl ControlConfig {
    /// Loads and validates a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses and validates a config from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Renders the config as TOML (used to print a template).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Checks the config for values the client cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("system name must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be non-zero".into()));
        }
        if self.max_inflight == 0 {
            return Err(ConfigError::Invalid("max_inflight must be non-zero".into()));
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "transport.connect_timeout_ms must be non-zero".into(),
            ));
        }
        if self.retry.base_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.base_interval_ms must be non-zero".into(),
            ));
        }
        if self.retry.base_interval_ms > self.retry.max_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_interval_ms ({}) exceeds retry.max_interval_ms ({})",
                self.retry.base_interval_ms, self.retry.max_interval_ms
            )));
        }
        if self.retry.max_candidates == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_candidates must be non-zero".into(),
            ));
        }
        for host in &self.hostlist {
            normalize_addr(host, self.port)
                .map_err(|e| ConfigError::Invalid(format!("hostlist: {e}")))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the configured host list, normalized and deduplicated.
    pub fn hosts(&self) -> Result<Vec<String>, ControlError> {
        normalize_hosts(&self.hostlist, self.port)
    }
}

/// Normalizes a host address, appending `default_port` when it has none.
///
/// Accepts `host`, `host:port`, `ip`, `ip:port`, and bracketed IPv6 with or
/// without a port. Bare IPv6 addresses get brackets added.
pub fn normalize_addr(addr: &str, default_port: u16) -> Result<String, ControlError> {
    let addr = addr.trim();
    let invalid = |reason: &str| ControlError::InvalidHost {
        addr: addr.to_string(),
        reason: reason.to_string(),
    };

    if addr.is_empty() {
        return Err(invalid("empty address"));
    }
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        if sock.port() == 0 {
            return Err(invalid("port must be non-zero"));
        }
        return Ok(sock.to_string());
    }
    let bare = addr
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(addr);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port).to_string());
    }

    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
            if port == 0 {
                return Err(invalid("port must be non-zero"));
            }
            (host, port)
        }
        None => (addr, default_port),
    };

    let valid_host = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
    if !valid_host {
        return Err(invalid("invalid host name"));
    }
    Ok(format!("{host}:{port}"))
}

/// Normalizes every address and drops duplicates, keeping first occurrences.
pub(crate) fn normalize_hosts(
    hosts: &[String],
    default_port: u16,
) -> Result<Vec<String>, ControlError> {
    let mut seen = HashSet::with_capacity(hosts.len());
    let mut out = Vec::with_capacity(hosts.len());
    for host in hosts {
        let addr = normalize_addr(host, default_port)?;
        if seen.insert(addr.clone()) {
            out.push(addr);
        }
    }
    Ok(out)
}
