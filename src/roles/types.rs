//! Stored role and credential records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificates::KeyType;
use crate::errors::{Error, Result};
use crate::secrets::{exposed, SecretString};

/// Default cloud endpoint when a role names the cloud authority without a URL.
pub const DEFAULT_CLOUD_URL: &str = "https://api.venafi.cloud";

/// The certificate authority a role is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityKind {
    OnPrem,
    OnPremRestricted,
    Cloud,
    CloudRestricted,
    Fake,
}

impl AuthorityKind {
    /// Cloud authorities never place IP addresses in certificates.
    pub fn supports_ip_sans(self) -> bool {
        !matches!(self, AuthorityKind::Cloud | AuthorityKind::CloudRestricted)
    }

    /// Whether the authority can authenticate with a refreshable access token.
    pub fn uses_bearer_tokens(self) -> bool {
        matches!(self, AuthorityKind::OnPrem | AuthorityKind::OnPremRestricted)
    }

    /// Restricted variants point at a zone whose policy constrains requests.
    pub fn is_restricted(self) -> bool {
        matches!(self, AuthorityKind::OnPremRestricted | AuthorityKind::CloudRestricted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthorityKind::OnPrem => "onprem",
            AuthorityKind::OnPremRestricted => "onprem_restricted",
            AuthorityKind::Cloud => "cloud",
            AuthorityKind::CloudRestricted => "cloud_restricted",
            AuthorityKind::Fake => "fake",
        }
    }
}

impl fmt::Display for AuthorityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "onprem" | "on_prem" | "tpp" => Ok(AuthorityKind::OnPrem),
            "onprem_restricted" | "tpp_restricted" => Ok(AuthorityKind::OnPremRestricted),
            "cloud" => Ok(AuthorityKind::Cloud),
            "cloud_restricted" => Ok(AuthorityKind::CloudRestricted),
            "fake" => Ok(AuthorityKind::Fake),
            other => Err(Error::UnsupportedAuthority { kind: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnPremParams {
    pub url: String,
    /// Policy folder requests are placed in
    pub zone: String,
    /// Let the authority generate the key pair instead of submitting a CSR
    #[serde(default)]
    pub service_generated_cert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudParams {
    pub url: String,
    /// Application and issuing template, `app\template`
    pub zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeParams {
    pub validity_days: u32,
}

impl Default for FakeParams {
    fn default() -> Self {
        Self { validity_days: 90 }
    }
}

/// Connection parameters, one shape per authority family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorityParams {
    OnPrem(OnPremParams),
    Cloud(CloudParams),
    Fake(FakeParams),
}

/// A stored role. Overwritten wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub kind: AuthorityKind,
    pub params: AuthorityParams,
    /// Name of the credential record under the credential root
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub generate_lease: bool,
    #[serde(default)]
    pub key_type: KeyType,
}

/// Access and refresh token that are always replaced together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(with = "exposed")]
    pub access_token: SecretString,
    #[serde(with = "exposed")]
    pub refresh_token: SecretString,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<SecretString>,
        refresh_token: impl Into<SecretString>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }
}

/// Secret material for one authority account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, with = "exposed::option")]
    pub password: Option<SecretString>,
    #[serde(default, with = "exposed::option")]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub tokens: Option<TokenPair>,
    /// CA bundle used to verify the authority's TLS endpoint
    #[serde(default)]
    pub trust_bundle_pem: Option<String>,
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.api_key.is_none()
            && self.tokens.is_none()
            && self.trust_bundle_pem.is_none()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.tokens.as_ref().is_some_and(|t| !t.refresh_token.is_blank())
    }
}
