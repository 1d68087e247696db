//! # Error Types
//!
//! Error taxonomy for the certificate issuance layer using `thiserror`.
//! Every variant belongs to exactly one [`ErrorCategory`] so callers can tell
//! configuration, transport, authentication, upstream and validation failures
//! apart without matching on message text.

use std::fmt;

use crate::connectors::ConnectorError;
use crate::errors::TlsError;

/// Custom result type for certbroker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown role, unsupported authority, missing credential reference.
    Configuration,
    /// Unparseable trust bundle, TLS or HTTP client construction failures.
    Transport,
    /// Expired or rejected credentials, failed token refresh.
    Authentication,
    /// Network failure, non-success response or empty payload from an authority.
    Upstream,
    /// A returned certificate does not match what was requested.
    Validation,
    /// The caller's input could not be used (bad CSR, bad IP, empty CN).
    Request,
    /// The backing store failed.
    Storage,
    /// The caller cancelled the operation.
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Request => "request",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Certificate fields checked by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationField {
    CommonName,
    DnsNames,
    IpAddresses,
    EmailAddresses,
    Organization,
    Issuer,
    KeyPair,
}

impl fmt::Display for ValidationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationField::CommonName => "common_name",
            ValidationField::DnsNames => "dns_names",
            ValidationField::IpAddresses => "ip_addresses",
            ValidationField::EmailAddresses => "email_addresses",
            ValidationField::Organization => "organization",
            ValidationField::Issuer => "issuer",
            ValidationField::KeyPair => "key_pair",
        };
        f.write_str(name)
    }
}

/// Main error type for certbroker
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No role is stored under the requested name
    #[error("Unknown role: {role}")]
    UnknownRole { role: String },

    /// The role names an authority kind this layer cannot talk to
    #[error("Unsupported authority: {kind}")]
    UnsupportedAuthority { kind: String },

    /// The role has no credential reference, or the reference is dangling
    #[error("Missing credential '{reference}' for role '{role}'")]
    MissingCredential { role: String, reference: String },

    /// The role configuration request is inconsistent
    #[error("Invalid role configuration: {message}")]
    InvalidRoleConfig { message: String },

    /// Application configuration failed validation
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Trust bundle could not be turned into a verification pool
    #[error("Invalid trust bundle: {0}")]
    InvalidTrustBundle(#[source] TlsError),

    /// The HTTP client could not be constructed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The authority-specific connector could not be constructed
    #[error("Failed to initialise {authority} connector: {message}")]
    ConnectorInit { authority: String, message: String },

    /// Credentials were rejected and cannot be refreshed
    #[error("Authentication failed for role '{role}': {source}")]
    Authentication {
        role: String,
        #[source]
        source: ConnectorError,
    },

    /// The refresh call for a token pair failed
    #[error("Access token refresh failed for credential '{credential}': {source}")]
    TokenRefresh {
        credential: String,
        #[source]
        source: ConnectorError,
    },

    /// New tokens were obtained but could not be stored
    #[error("Refreshed tokens for credential '{credential}' could not be persisted: {message}")]
    TokenPersistence { credential: String, message: String },

    /// Enrollment failed upstream
    #[error("Issuance failed for role '{role}': {source}")]
    IssuanceFailed {
        role: String,
        #[source]
        source: ConnectorError,
    },

    /// CSR signing failed upstream
    #[error("Signing failed for role '{role}': {source}")]
    SigningFailed {
        role: String,
        #[source]
        source: ConnectorError,
    },

    /// The authority answered without certificate data
    #[error("Authority returned no {what} for {operation}")]
    EmptyResponse { operation: &'static str, what: &'static str },

    /// The returned certificate could not be decoded
    #[error("Malformed certificate: {reason}")]
    MalformedCertificate { reason: String },

    /// The returned certificate does not match the request
    #[error("Certificate {field} mismatch: expected {expected}, got {actual}")]
    ValidationMismatch { field: ValidationField, expected: String, actual: String },

    /// The caller's request could not be used
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Key generation, encoding or encryption failed
    #[error("Key material error: {message}")]
    KeyMaterial { message: String },

    /// The backing store failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller cancelled the operation
    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: &'static str },
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create an invalid role configuration error
    pub fn invalid_role<S: Into<String>>(message: S) -> Self {
        Self::InvalidRoleConfig { message: message.into() }
    }

    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// Create a key material error
    pub fn key_material<S: Into<String>>(message: S) -> Self {
        Self::KeyMaterial { message: message.into() }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Create a malformed certificate error
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedCertificate { reason: reason.into() }
    }

    /// Create a connector initialisation error
    pub fn connector_init<A: fmt::Display, S: Into<String>>(authority: A, message: S) -> Self {
        Self::ConnectorInit { authority: authority.to_string(), message: message.into() }
    }

    /// Create a validation mismatch error
    pub fn mismatch<E: Into<String>, A: Into<String>>(
        field: ValidationField,
        expected: E,
        actual: A,
    ) -> Self {
        Self::ValidationMismatch { field, expected: expected.into(), actual: actual.into() }
    }

    /// The failure class this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UnknownRole { .. }
            | Error::UnsupportedAuthority { .. }
            | Error::MissingCredential { .. }
            | Error::InvalidRoleConfig { .. }
            | Error::Config { .. } => ErrorCategory::Configuration,
            Error::InvalidTrustBundle(_)
            | Error::Transport { .. }
            | Error::ConnectorInit { .. } => ErrorCategory::Transport,
            Error::Authentication { .. }
            | Error::TokenRefresh { .. }
            | Error::TokenPersistence { .. } => ErrorCategory::Authentication,
            Error::IssuanceFailed { source, .. } | Error::SigningFailed { source, .. } => {
                if source.is_authentication() {
                    ErrorCategory::Authentication
                } else {
                    ErrorCategory::Upstream
                }
            }
            Error::EmptyResponse { .. } => ErrorCategory::Upstream,
            Error::MalformedCertificate { .. } | Error::ValidationMismatch { .. } => {
                ErrorCategory::Validation
            }
            Error::InvalidRequest { .. } | Error::KeyMaterial { .. } => ErrorCategory::Request,
            Error::Storage { .. } | Error::Serialization(_) | Error::Io(_) => {
                ErrorCategory::Storage
            }
            Error::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    /// The validator field that failed, if this is a validation mismatch
    pub fn mismatched_field(&self) -> Option<ValidationField> {
        match self {
            Error::ValidationMismatch { field, .. } => Some(*field),
            _ => None,
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::config(format!("Validation failed: {}", message))
    }
}
