//! # Configuration Settings
//!
//! Operational settings, built once at startup and shared by reference with
//! the connector factory, token manager and orchestrators.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use super::authorities::AuthoritiesConfig;
use super::{env_flag, env_parse, env_string, EnvLookup};
use crate::errors::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub transport: TransportConfig,

    #[validate(nested)]
    pub tokens: TokenConfig,

    #[validate(nested)]
    pub logging: LoggingConfig,

    /// Per-authority connection and test settings
    pub authorities: AuthoritiesConfig,

    /// Location of the file-backed store used by the CLI
    pub store_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            tokens: TokenConfig::default(),
            logging: LoggingConfig::default(),
            authorities: AuthoritiesConfig::default(),
            store_path: PathBuf::from("certbroker-store.json"),
        }
    }
}

impl AppConfig {
    /// Read `CERTBROKER_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: &EnvLookup<'_>) -> Result<Self> {
        let defaults = Self::default();
        let transport = TransportConfig::default();

        let config = Self {
            transport: TransportConfig {
                request_timeout_seconds: env_parse(
                    lookup,
                    "CERTBROKER_REQUEST_TIMEOUT_SECS",
                    transport.request_timeout_seconds,
                )?,
                retrieval_poll_interval_ms: env_parse(
                    lookup,
                    "CERTBROKER_RETRIEVAL_POLL_INTERVAL_MS",
                    transport.retrieval_poll_interval_ms,
                )?,
                retrieval_deadline_seconds: env_parse(
                    lookup,
                    "CERTBROKER_RETRIEVAL_DEADLINE_SECS",
                    transport.retrieval_deadline_seconds,
                )?,
                ..transport
            },
            tokens: TokenConfig {
                refresh_margin_seconds: env_parse(
                    lookup,
                    "CERTBROKER_TOKEN_REFRESH_MARGIN_SECS",
                    defaults.tokens.refresh_margin_seconds,
                )?,
            },
            logging: LoggingConfig {
                level: env_string(lookup, "CERTBROKER_LOG_LEVEL")
                    .unwrap_or(defaults.logging.level),
                json: env_flag(lookup, "CERTBROKER_LOG_JSON"),
            },
            authorities: AuthoritiesConfig::from_lookup(lookup)?,
            store_path: env_string(lookup, "CERTBROKER_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;

        if self.transport.retrieval_poll_interval() >= self.transport.retrieval_deadline() {
            return Err(Error::config(
                "Retrieval poll interval must be shorter than the retrieval deadline",
            ));
        }

        Ok(())
    }
}

/// Network client settings shared by every authority connector.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransportConfig {
    #[validate(range(min = 1, max = 300, message = "Dial timeout must be between 1 and 300 seconds"))]
    pub connect_timeout_seconds: u64,

    #[validate(range(min = 1, max = 3600))]
    pub keepalive_seconds: u64,

    /// Bound on the TLS handshake. Folded into the connect phase because the
    /// HTTP client connects and handshakes as one step.
    #[validate(range(min = 1, max = 300))]
    pub tls_handshake_timeout_seconds: u64,

    #[validate(range(
        min = 1,
        max = 600,
        message = "Request timeout must be between 1 and 600 seconds"
    ))]
    pub request_timeout_seconds: u64,

    #[validate(range(min = 1, max = 10000))]
    pub max_idle_connections: usize,

    #[validate(range(min = 1, max = 3600))]
    pub idle_timeout_seconds: u64,

    /// Delay between retrieval attempts while an authority reports pending
    #[validate(range(min = 10, max = 60000))]
    pub retrieval_poll_interval_ms: u64,

    /// Total time a connector waits for a pending certificate
    #[validate(range(min = 1, max = 3600))]
    pub retrieval_deadline_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 30,
            keepalive_seconds: 30,
            tls_handshake_timeout_seconds: 10,
            request_timeout_seconds: 30,
            max_idle_connections: 100,
            idle_timeout_seconds: 90,
            retrieval_poll_interval_ms: 2000,
            retrieval_deadline_seconds: 180,
        }
    }
}

impl TransportConfig {
    /// Connect bound: the dial timeout plus the TLS handshake allowance (40s by
    /// default, not the bare 30s dial timeout). reqwest has no separate
    /// handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds + self.tls_handshake_timeout_seconds)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn retrieval_poll_interval(&self) -> Duration {
        Duration::from_millis(self.retrieval_poll_interval_ms)
    }

    pub fn retrieval_deadline(&self) -> Duration {
        Duration::from_secs(self.retrieval_deadline_seconds)
    }
}

/// Access token lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TokenConfig {
    /// A token whose expiry is closer than this is refreshed before use
    #[validate(range(max = 86400, message = "Refresh margin cannot exceed one day"))]
    pub refresh_margin_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { refresh_margin_seconds: 300 }
    }
}

impl TokenConfig {
    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_margin_seconds as i64)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
