//! # Structured Logging
//!
//! Span macros for issuance and connector calls, plus subscriber setup for
//! the binary. Library code only emits events; it never installs a
//! subscriber itself.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{AppConfig, LoggingConfig};

/// Create a tracing span covering one issuance or signing call.
///
/// ```rust,ignore
/// let span = issuance_span!("issue", "web-role");
/// let span = issuance_span!("issue", "web-role", cn = %common_name);
/// ```
#[macro_export]
macro_rules! issuance_span {
    ($operation:expr, $role:expr) => {
        tracing::info_span!(
            "issuance",
            operation = %$operation,
            role = %$role,
            request_id = %uuid::Uuid::new_v4(),
            authority = tracing::field::Empty
        )
    };
    ($operation:expr, $role:expr, $($field:tt)*) => {
        tracing::info_span!(
            "issuance",
            operation = %$operation,
            role = %$role,
            request_id = %uuid::Uuid::new_v4(),
            authority = tracing::field::Empty,
            $($field)*
        )
    };
}

/// Create a tracing span for a single call to an upstream authority.
#[macro_export]
macro_rules! connector_span {
    ($authority:expr, $call:expr) => {
        tracing::debug_span!(
            "connector_call",
            authority = %$authority,
            call = %$call,
            call_id = %uuid::Uuid::new_v4()
        )
    };
    ($authority:expr, $call:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "connector_call",
            authority = %$authority,
            call = %$call,
            call_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Returns `false` when a subscriber was already installed (integration
/// tests, embedding hosts).
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = if config.json {
        tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).json().finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).finish(),
        )
    };

    installed.is_ok()
}

/// Log configuration at startup. Secrets are never included.
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        store_path = %config.store_path.display(),
        request_timeout_secs = config.transport.request_timeout_seconds,
        refresh_margin_secs = config.tokens.refresh_margin_seconds,
        onprem_configured = config.authorities.onprem.url.is_some(),
        cloud_configured = config.authorities.cloud.apikey.is_some(),
        "certbroker configuration"
    );
}
