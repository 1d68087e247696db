//! # Authority Connectors
//!
//! A [`Connector`] is the client object for one certificate authority. The
//! [`ConnectorFactory`] builds the right connector for a role; the
//! orchestrators only ever see the trait.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::roles::AuthorityKind;
use crate::secrets::SecretString;

pub mod cloud;
pub mod error;
pub mod factory;
pub mod fake;
pub mod tpp;

pub use cloud::CloudConnector;
pub use error::ConnectorError;
pub use factory::{ConnectorBuilder, ConnectorFactory};
pub use fake::{FakeAuthority, FakeConnector};
pub use tpp::TppConnector;

pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// Who generates the key pair for an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// This layer generates the key and submits a CSR
    Local,
    /// The authority generates the key and returns it with the certificate
    Service,
}

/// Input to [`Connector::enroll`].
#[derive(Debug, Clone, Default)]
pub struct EnrollmentRequest {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
    pub organization: Option<String>,
    /// PEM CSR, present when the key origin is [`KeyOrigin::Local`]
    pub csr: Option<String>,
}

/// Certificate material returned by an authority.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentResponse {
    pub certificate: String,
    pub chain: Vec<String>,
    /// Unencrypted PKCS#8 key, only for [`KeyOrigin::Service`] enrollments
    pub private_key: Option<SecretString>,
}

/// Input to [`Connector::refresh_access_token`].
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub refresh_token: SecretString,
    pub client_id: &'static str,
    pub scope: &'static str,
}

/// A freshly issued token pair as reported by the authority.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Client for one certificate authority.
///
/// # Errors
///
/// All operations return [`ConnectorError`]. A rejected bearer token is
/// reported as [`ConnectorError::AuthenticationExpired`] so the caller can
/// refresh and retry once.
#[async_trait]
pub trait Connector: Send + Sync {
    fn authority(&self) -> AuthorityKind;

    fn supports_ip_sans(&self) -> bool {
        self.authority().supports_ip_sans()
    }

    fn key_origin(&self) -> KeyOrigin {
        KeyOrigin::Local
    }

    /// Request a new certificate.
    async fn enroll(&self, request: &EnrollmentRequest) -> ConnectorResult<EnrollmentResponse>;

    /// Have the authority sign an externally supplied CSR.
    async fn sign(&self, csr_pem: &str) -> ConnectorResult<EnrollmentResponse>;

    /// Exchange a refresh token for a new token pair.
    async fn refresh_access_token(&self, request: &RefreshRequest)
        -> ConnectorResult<TokenResponse>;
}

/// Split a PEM bundle into leaf certificate, chain and optional key.
pub(crate) fn split_pem_bundle(
    text: &str,
) -> ConnectorResult<(String, Vec<String>, Option<SecretString>)> {
    let blocks = ::pem::parse_many(text)
        .map_err(|e| ConnectorError::InvalidResponse(format!("invalid PEM bundle: {}", e)))?;
    let config = ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF);

    let mut certificates = Vec::new();
    let mut private_key = None;
    for block in &blocks {
        match block.tag() {
            "CERTIFICATE" => certificates.push(::pem::encode_config(block, config)),
            "PRIVATE KEY" | "ENCRYPTED PRIVATE KEY" | "RSA PRIVATE KEY" | "EC PRIVATE KEY" => {
                private_key = Some(SecretString::new(::pem::encode_config(block, config)));
            }
            _ => {}
        }
    }

    if certificates.is_empty() {
        return Ok((String::new(), Vec::new(), private_key));
    }
    let leaf = certificates.remove(0);
    Ok((leaf, certificates, private_key))
}

/// Poll schedule for certificates the authority has not issued yet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetrievalSchedule {
    pub interval: Duration,
    pub deadline: Duration,
}

/// Extract a readable message from an authority error body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            ["error_description", "Error", "error", "message"]
                .iter()
                .find_map(|key| json.get(*key).and_then(|v| v.as_str()).map(str::to_string))
                .or_else(|| {
                    json.get("errors")
                        .and_then(|errors| errors.get(0))
                        .and_then(|first| first.get("message"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "(empty body)".to_string()
            } else {
                trimmed.chars().take(512).collect()
            }
        })
}
