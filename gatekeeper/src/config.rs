//! Server configuration module.
//!
//! This module loads the gatekeeper configuration from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `GATE_SECRET_KEY`: HMAC signing secret (required, non-empty)
//! - `GATE_LISTEN_HOST`: Address to bind (default: `127.0.0.1`)
//! - `GATE_LISTEN_PORT`: Port to listen on (default: `8000`)
//! - `GATE_TOKEN_TTL_SECS`: Default token lifetime (default: `86400`)
//! - `GATE_RATE_LIMIT_REQUESTS`: Requests per window (default: `100`)
//! - `GATE_RATE_LIMIT_WINDOW_SECS`: Window length (default: `60`)
//! - `GATE_RATE_LIMIT_PREFIX`: Rate-limit key prefix (default: `api`)
//! - `GATE_STORE_TIMEOUT_MS`: Backend call timeout, `0` disables (default: `250`)
//! - `GATE_AUDIT_ADMITTED`: Audit admitted requests too (default: `false`)
//! - `GATE_LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
//! - `GATE_REDIS_URL`: Shared store for rate-limit windows and credentials
//!   (optional; in-process state when unset)
//! - `GATE_ADMIN_API_KEY`: Raw secret of a bootstrap Admin API key seeded at
//!   startup (optional, at least 16 characters)
//!
//! # Invariants
//!
//! - `secret_key` is never empty.
//! - `rate_limit_requests` and `rate_limit_window_secs` are positive.
//! - `admin_api_key`, when set, is at least
//!   [`GateConfig::MIN_ADMIN_API_KEY_LEN`] characters.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::gate::GateSettings;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "console" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("'{other}' is not a log format (expected 'pretty' or 'json')")),
        }
    }
}

/// Gatekeeper configuration.
///
/// # Pre-conditions
///
/// When constructed via `from_env()`:
/// - `GATE_SECRET_KEY` must be set
/// - All values that are set must be valid for their respective types
///
/// # Post-conditions
///
/// - `secret_key` is non-empty
#[derive(Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Secret used to sign and verify tokens.
    pub secret_key: String,
    /// Address to bind.
    pub listen_host: IpAddr,
    /// Port to listen on.
    pub listen_port: u16,
    /// Default token lifetime.
    pub token_ttl: Duration,
    /// Default requests per window.
    pub rate_limit_requests: u32,
    /// Window length in seconds.
    pub rate_limit_window_secs: u64,
    /// Rate-limit key prefix.
    pub rate_limit_prefix: String,
    /// Bound on each rate-limit backend call.
    pub store_timeout: Option<Duration>,
    /// Whether admitted requests are audited.
    pub audit_admitted: bool,
    /// Log output format.
    pub log_format: LogFormat,
    /// Shared store URL; in-process state when `None`.
    pub redis_url: Option<String>,
    /// Raw secret of the bootstrap Admin API key.
    pub admin_api_key: Option<String>,
}

impl fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateConfig")
            .field("secret_key", &"<redacted>")
            .field("listen_host", &self.listen_host)
            .field("listen_port", &self.listen_port)
            .field("token_ttl", &self.token_ttl)
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("rate_limit_prefix", &self.rate_limit_prefix)
            .field("store_timeout", &self.store_timeout)
            .field("audit_admitted", &self.audit_admitted)
            .field("log_format", &self.log_format)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<set>"))
            .field("admin_api_key", &self.admin_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl GateConfig {
    /// Default port for the server.
    pub const DEFAULT_PORT: u16 = 8000;
    /// Default bind address.
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    /// Default token lifetime in seconds (24 hours).
    pub const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;
    /// Default requests per window.
    pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 100;
    /// Default window length in seconds.
    pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
    /// Default rate-limit key prefix.
    pub const DEFAULT_RATE_LIMIT_PREFIX: &'static str = "api";
    /// Default backend call timeout in milliseconds.
    pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 250;
    /// Minimum length of the bootstrap admin secret.
    pub const MIN_ADMIN_API_KEY_LEN: usize = 16;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `GATE_SECRET_KEY` is not set or is empty
    /// - any other variable is set but cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`GateConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret_key = lookup("GATE_SECRET_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("GATE_SECRET_KEY".to_string()))?;
        if secret_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "GATE_SECRET_KEY".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let listen_host = parse_or(&lookup, "GATE_LISTEN_HOST", || {
            IpAddr::from([127, 0, 0, 1])
        })?;
        let listen_port = parse_or(&lookup, "GATE_LISTEN_PORT", || Self::DEFAULT_PORT)?;
        let token_ttl_secs = positive(
            "GATE_TOKEN_TTL_SECS",
            parse_or(&lookup, "GATE_TOKEN_TTL_SECS", || Self::DEFAULT_TOKEN_TTL_SECS)?,
        )?;
        let rate_limit_requests = positive(
            "GATE_RATE_LIMIT_REQUESTS",
            parse_or(&lookup, "GATE_RATE_LIMIT_REQUESTS", || {
                Self::DEFAULT_RATE_LIMIT_REQUESTS
            })?,
        )?;
        let rate_limit_window_secs = positive(
            "GATE_RATE_LIMIT_WINDOW_SECS",
            parse_or(&lookup, "GATE_RATE_LIMIT_WINDOW_SECS", || {
                Self::DEFAULT_RATE_LIMIT_WINDOW_SECS
            })?,
        )?;
        let rate_limit_prefix = lookup("GATE_RATE_LIMIT_PREFIX")
            .unwrap_or_else(|| Self::DEFAULT_RATE_LIMIT_PREFIX.to_string());
        let store_timeout_ms = parse_or(&lookup, "GATE_STORE_TIMEOUT_MS", || {
            Self::DEFAULT_STORE_TIMEOUT_MS
        })?;
        let audit_admitted = parse_or(&lookup, "GATE_AUDIT_ADMITTED", || false)?;
        let log_format = parse_or(&lookup, "GATE_LOG_FORMAT", LogFormat::default)?;
        let redis_url = non_empty(&lookup, "GATE_REDIS_URL")?;
        let admin_api_key = non_empty(&lookup, "GATE_ADMIN_API_KEY")?;
        if let Some(key) = &admin_api_key
            && key.chars().count() < Self::MIN_ADMIN_API_KEY_LEN
        {
            return Err(ConfigError::InvalidValue {
                name: "GATE_ADMIN_API_KEY".to_string(),
                message: format!(
                    "must be at least {} characters",
                    Self::MIN_ADMIN_API_KEY_LEN
                ),
            });
        }

        Ok(Self {
            secret_key,
            listen_host,
            listen_port,
            token_ttl: Duration::from_secs(token_ttl_secs),
            rate_limit_requests,
            rate_limit_window_secs,
            rate_limit_prefix,
            store_timeout: (store_timeout_ms > 0).then(|| Duration::from_millis(store_timeout_ms)),
            audit_admitted,
            log_format,
            redis_url,
            admin_api_key,
        })
    }

    /// Gate settings derived from this configuration.
    #[must_use]
    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            key_prefix: self.rate_limit_prefix.clone(),
            default_limit: self.rate_limit_requests,
            window_secs: self.rate_limit_window_secs,
            audit_admitted: self.audit_admitted,
        }
    }
}

/// Parse a variable if set, else use the default.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: impl FnOnce() -> T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}': {e}"),
        }),
        None => Ok(default()),
    }
}

/// An optional variable that, when set, must not be blank.
fn non_empty(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<String>, ConfigError> {
    match lookup(name) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: "must not be empty when set".to_string(),
        }),
        other => Ok(other),
    }
}

fn positive<T: Default + PartialEq>(name: &str, value: T) -> Result<T, ConfigError> {
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
