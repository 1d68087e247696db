//! # Configuration Management
//!
//! Configuration is read once at process start (after `.env` loading) and
//! passed explicitly from there on.

pub mod authorities;
pub mod settings;

pub use authorities::{AuthoritiesConfig, CloudSettings, FakeSettings, OnPremSettings};
pub use settings::{AppConfig, LoggingConfig, TokenConfig, TransportConfig};

use crate::errors::{Error, Result};

/// Source of configuration variables, usually the process environment.
pub type EnvLookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

pub(crate) fn env_string(lookup: &EnvLookup<'_>, key: &str) -> Option<String> {
    lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(crate) fn env_flag(lookup: &EnvLookup<'_>, key: &str) -> bool {
    env_string(lookup, key)
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

pub(crate) fn env_parse<T>(lookup: &EnvLookup<'_>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(lookup, key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::config(format!("Invalid value for {}: {}", key, e))),
        None => Ok(default),
    }
}
