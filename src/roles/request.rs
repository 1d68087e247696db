//! Role configuration requests as submitted by operators.

use std::path::PathBuf;

use serde::Deserialize;
use validator::Validate;

use super::registry::inline_credential_ref;
use super::types::{
    AuthorityKind, AuthorityParams, CloudParams, Credential, FakeParams, OnPremParams,
    RoleConfig, TokenPair, DEFAULT_CLOUD_URL,
};
use crate::certificates::KeyType;
use crate::errors::{Error, Result};
use crate::secrets::SecretString;

/// Fields accepted when creating or replacing a role.
///
/// When `authority` is absent the kind is inferred: `fakemode` selects the
/// fake authority, `tpp_url` the on-prem authority, `cloud_url` or `apikey`
/// the cloud authority. Restricted variants must be named explicitly.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct RoleRequest {
    pub authority: Option<String>,

    #[validate(url(message = "tpp_url must be a valid URL"))]
    pub tpp_url: Option<String>,
    pub tpp_user: Option<String>,
    pub tpp_password: Option<SecretString>,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,

    #[validate(length(min = 1, message = "zone cannot be empty"))]
    pub zone: Option<String>,
    pub trust_bundle_file: Option<PathBuf>,

    #[validate(url(message = "cloud_url must be a valid URL"))]
    pub cloud_url: Option<String>,
    pub apikey: Option<SecretString>,

    /// Name of an already stored credential record
    pub credential: Option<String>,

    pub generate_lease: bool,
    pub fakemode: bool,
    pub service_generated_cert: bool,
    pub key_type: Option<KeyType>,

    #[validate(range(min = 1, max = 3650, message = "validity_days must be between 1 and 3650"))]
    pub validity_days: Option<u32>,
}

impl RoleRequest {
    /// Authority kind named or implied by the request.
    pub fn authority_kind(&self) -> Result<AuthorityKind> {
        if let Some(explicit) = &self.authority {
            return explicit.parse();
        }
        if self.fakemode {
            Ok(AuthorityKind::Fake)
        } else if self.tpp_url.is_some() {
            Ok(AuthorityKind::OnPrem)
        } else if self.cloud_url.is_some() || self.apikey.is_some() {
            Ok(AuthorityKind::Cloud)
        } else {
            Err(Error::invalid_role(
                "cannot determine authority: set authority, fakemode, tpp_url or cloud_url/apikey",
            ))
        }
    }

    fn has_inline_credential(&self) -> bool {
        self.tpp_user.is_some()
            || self.tpp_password.is_some()
            || self.access_token.is_some()
            || self.refresh_token.is_some()
            || self.apikey.is_some()
            || self.trust_bundle_file.is_some()
    }

    /// Split the request into the role record and, when credentials were
    /// given inline, the credential record the role owns (`role/<name>`).
    ///
    /// `trust_bundle_pem` is the already loaded content of `trust_bundle_file`.
    pub fn into_role(
        self,
        name: &str,
        trust_bundle_pem: Option<String>,
    ) -> Result<(RoleConfig, Option<Credential>)> {
        Validate::validate(&self)
            .map_err(|e| Error::invalid_role(Error::from(e).to_string()))?;

        let kind = self.authority_kind()?;
        let inline = self.has_inline_credential();

        if inline && self.credential.is_some() {
            return Err(Error::invalid_role(
                "inline credentials and a credential reference cannot be combined",
            ));
        }

        let (params, credential) = match kind {
            AuthorityKind::OnPrem | AuthorityKind::OnPremRestricted => {
                let url = self
                    .tpp_url
                    .clone()
                    .ok_or_else(|| Error::invalid_role("tpp_url is required for on-prem roles"))?;
                let zone = self.require_zone(kind)?;
                let credential = if inline { Some(self.onprem_credential(trust_bundle_pem)?) } else { None };
                (
                    AuthorityParams::OnPrem(OnPremParams {
                        url,
                        zone,
                        service_generated_cert: self.service_generated_cert,
                    }),
                    credential,
                )
            }
            AuthorityKind::Cloud | AuthorityKind::CloudRestricted => {
                let url = self.cloud_url.clone().unwrap_or_else(|| DEFAULT_CLOUD_URL.to_string());
                let zone = self.require_zone(kind)?;
                let credential = if inline { Some(self.cloud_credential(trust_bundle_pem)?) } else { None };
                (AuthorityParams::Cloud(CloudParams { url, zone }), credential)
            }
            AuthorityKind::Fake => {
                if inline || self.credential.is_some() {
                    return Err(Error::invalid_role("the fake authority takes no credentials"));
                }
                let validity_days = self.validity_days.unwrap_or(FakeParams::default().validity_days);
                (AuthorityParams::Fake(FakeParams { validity_days }), None)
            }
        };

        let credential_ref = match (&credential, self.credential) {
            (Some(_), _) => Some(inline_credential_ref(name)),
            (None, Some(reference)) => Some(reference),
            (None, None) if kind == AuthorityKind::Fake => None,
            (None, None) => {
                return Err(Error::invalid_role(format!(
                    "{} roles need inline credentials or a credential reference",
                    kind
                )))
            }
        };

        let role = RoleConfig {
            name: name.to_string(),
            kind,
            params,
            credential_ref,
            generate_lease: self.generate_lease,
            key_type: self.key_type.unwrap_or_default(),
        };

        Ok((role, credential))
    }

    fn require_zone(&self, kind: AuthorityKind) -> Result<String> {
        self.zone
            .clone()
            .ok_or_else(|| Error::invalid_role(format!("zone is required for {} roles", kind)))
    }

    fn onprem_credential(&self, trust_bundle_pem: Option<String>) -> Result<Credential> {
        if self.apikey.is_some() {
            return Err(Error::invalid_role("apikey is not used by on-prem roles"));
        }

        let tokens = match (&self.access_token, &self.refresh_token) {
            (Some(access), refresh) => Some(TokenPair {
                access_token: access.clone(),
                refresh_token: refresh.clone().unwrap_or_default(),
                expires_at: None,
            }),
            (None, Some(_)) => {
                return Err(Error::invalid_role("refresh_token requires access_token"));
            }
            (None, None) => None,
        };

        let has_password = self.tpp_user.is_some() && self.tpp_password.is_some();
        if tokens.is_none() && !has_password {
            return Err(Error::invalid_role(
                "on-prem roles need tpp_user and tpp_password, or access_token",
            ));
        }

        Ok(Credential {
            username: self.tpp_user.clone(),
            password: self.tpp_password.clone(),
            api_key: None,
            tokens,
            trust_bundle_pem,
        })
    }

    fn cloud_credential(&self, trust_bundle_pem: Option<String>) -> Result<Credential> {
        if self.tpp_user.is_some() || self.access_token.is_some() {
            return Err(Error::invalid_role("cloud roles authenticate with apikey only"));
        }
        let api_key = self
            .apikey
            .clone()
            .ok_or_else(|| Error::invalid_role("apikey is required for cloud roles"))?;

        Ok(Credential { api_key: Some(api_key), trust_bundle_pem, ..Default::default() })
    }
}
