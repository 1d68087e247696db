//! Per-authority operational settings.
//!
//! These values seed the CLI's default role and drive the live test suite.
//! They are never consulted on the request path except for the expected
//! issuer common name used by the validator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{env_flag, env_string, EnvLookup};
use crate::errors::Result;
use crate::roles::AuthorityKind;
use crate::secrets::SecretString;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthoritiesConfig {
    pub onprem: OnPremSettings,
    pub cloud: CloudSettings,
    pub fake: FakeSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnPremSettings {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub zone: Option<String>,
    pub restricted_zone: Option<String>,
    pub trust_bundle_file: Option<PathBuf>,
    pub issuer_cn: Option<String>,
    pub testing: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudSettings {
    pub url: Option<String>,
    pub apikey: Option<SecretString>,
    pub zone: Option<String>,
    pub restricted_zone: Option<String>,
    pub issuer_cn: Option<String>,
    pub testing: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakeSettings {
    pub issuer_cn: Option<String>,
    pub testing: bool,
}

impl AuthoritiesConfig {
    pub fn from_lookup(lookup: &EnvLookup<'_>) -> Result<Self> {
        let secret = |key: &str| env_string(lookup, key).map(SecretString::new);

        Ok(Self {
            onprem: OnPremSettings {
                url: env_string(lookup, "CERTBROKER_ONPREM_URL"),
                user: env_string(lookup, "CERTBROKER_ONPREM_USER"),
                password: secret("CERTBROKER_ONPREM_PASSWORD"),
                access_token: secret("CERTBROKER_ONPREM_ACCESS_TOKEN"),
                refresh_token: secret("CERTBROKER_ONPREM_REFRESH_TOKEN"),
                zone: env_string(lookup, "CERTBROKER_ONPREM_ZONE"),
                restricted_zone: env_string(lookup, "CERTBROKER_ONPREM_RESTRICTED_ZONE"),
                trust_bundle_file: env_string(lookup, "CERTBROKER_ONPREM_TRUST_BUNDLE")
                    .map(PathBuf::from),
                issuer_cn: env_string(lookup, "CERTBROKER_ONPREM_ISSUER_CN"),
                testing: env_flag(lookup, "CERTBROKER_ONPREM_TESTING"),
            },
            cloud: CloudSettings {
                url: env_string(lookup, "CERTBROKER_CLOUD_URL"),
                apikey: secret("CERTBROKER_CLOUD_APIKEY"),
                zone: env_string(lookup, "CERTBROKER_CLOUD_ZONE"),
                restricted_zone: env_string(lookup, "CERTBROKER_CLOUD_RESTRICTED_ZONE"),
                issuer_cn: env_string(lookup, "CERTBROKER_CLOUD_ISSUER_CN"),
                testing: env_flag(lookup, "CERTBROKER_CLOUD_TESTING"),
            },
            fake: FakeSettings {
                issuer_cn: env_string(lookup, "CERTBROKER_FAKE_ISSUER_CN"),
                testing: env_flag(lookup, "CERTBROKER_FAKE_TESTING"),
            },
        })
    }

    /// Issuer common name certificates from `kind` must carry, if configured.
    pub fn expected_issuer(&self, kind: AuthorityKind) -> Option<&str> {
        match kind {
            AuthorityKind::OnPrem | AuthorityKind::OnPremRestricted => {
                self.onprem.issuer_cn.as_deref()
            }
            AuthorityKind::Cloud | AuthorityKind::CloudRestricted => {
                self.cloud.issuer_cn.as_deref()
            }
            AuthorityKind::Fake => self.fake.issuer_cn.as_deref(),
        }
    }

    /// Whether live tests against `kind` are enabled.
    pub fn testing_enabled(&self, kind: AuthorityKind) -> bool {
        match kind {
            AuthorityKind::OnPrem | AuthorityKind::OnPremRestricted => self.onprem.testing,
            AuthorityKind::Cloud | AuthorityKind::CloudRestricted => self.cloud.testing,
            AuthorityKind::Fake => self.fake.testing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_issuer_shared_by_restricted_variant() {
        let lookup = |key: &str| match key {
            "CERTBROKER_ONPREM_ISSUER_CN" => Some("Corp Issuing CA".to_string()),
            "CERTBROKER_CLOUD_TESTING" => Some("TRUE".to_string()),
            _ => None,
        };
        let config = AuthoritiesConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.expected_issuer(AuthorityKind::OnPrem), Some("Corp Issuing CA"));
        assert_eq!(
            config.expected_issuer(AuthorityKind::OnPremRestricted),
            Some("Corp Issuing CA")
        );
        assert_eq!(config.expected_issuer(AuthorityKind::Fake), None);
        assert!(config.testing_enabled(AuthorityKind::CloudRestricted));
        assert!(!config.testing_enabled(AuthorityKind::OnPrem));
    }
}
