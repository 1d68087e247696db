use std::sync::{Arc, OnceLock};

use super::{CloudConnector, Connector, FakeAuthority, FakeConnector, TppConnector};
use crate::config::AppConfig;
use crate::errors::{Error, Result};
use crate::roles::{AuthorityKind, AuthorityParams, Credential, RoleConfig};

/// Builds a connector for a resolved role.
///
/// The issuance service goes through this trait so tests can substitute
/// connectors without touching the network.
pub trait ConnectorBuilder: Send + Sync {
    fn build(&self, role: &RoleConfig, credential: &Credential) -> Result<Arc<dyn Connector>>;
}

/// Default builder selecting the connector from the role's authority kind.
#[derive(Debug)]
pub struct ConnectorFactory {
    config: Arc<AppConfig>,
    fake_ca: OnceLock<Arc<FakeAuthority>>,
}

impl ConnectorFactory {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config, fake_ca: OnceLock::new() }
    }

    /// The process-wide fake CA, generated on first use.
    pub fn fake_authority(&self) -> Result<Arc<FakeAuthority>> {
        if let Some(existing) = self.fake_ca.get() {
            return Ok(existing.clone());
        }
        let created =
            Arc::new(FakeAuthority::new(self.config.authorities.fake.issuer_cn.as_deref())?);
        Ok(self.fake_ca.get_or_init(|| created).clone())
    }
}

impl ConnectorBuilder for ConnectorFactory {
    fn build(&self, role: &RoleConfig, credential: &Credential) -> Result<Arc<dyn Connector>> {
        let transport = &self.config.transport;
        let connector: Arc<dyn Connector> = match (role.kind, &role.params) {
            (
                kind @ (AuthorityKind::OnPrem | AuthorityKind::OnPremRestricted),
                AuthorityParams::OnPrem(params),
            ) => Arc::new(TppConnector::new(kind, params, credential, transport)?),
            (
                kind @ (AuthorityKind::Cloud | AuthorityKind::CloudRestricted),
                AuthorityParams::Cloud(params),
            ) => Arc::new(CloudConnector::new(kind, params, credential, transport)?),
            (AuthorityKind::Fake, AuthorityParams::Fake(params)) => {
                Arc::new(FakeConnector::new(self.fake_authority()?, params))
            }
            (kind, _) => {
                return Err(Error::UnsupportedAuthority {
                    kind: format!("{} with mismatched connection parameters", kind),
                })
            }
        };
        Ok(connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::KeyType;
    use crate::roles::{CloudParams, FakeParams};

    fn role(kind: AuthorityKind, params: AuthorityParams) -> RoleConfig {
        RoleConfig {
            name: "web".into(),
            kind,
            params,
            credential_ref: None,
            generate_lease: false,
            key_type: KeyType::default(),
        }
    }

    #[test]
    fn builds_fake_connector_and_reuses_ca() {
        let factory = ConnectorFactory::new(Arc::new(AppConfig::default()));
        let connector = factory
            .build(
                &role(AuthorityKind::Fake, AuthorityParams::Fake(FakeParams::default())),
                &Credential::default(),
            )
            .unwrap();
        assert_eq!(connector.authority(), AuthorityKind::Fake);

        let first = factory.fake_authority().unwrap();
        let second = factory.fake_authority().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn mismatched_params_are_rejected() {
        let factory = ConnectorFactory::new(Arc::new(AppConfig::default()));
        let err = factory
            .build(
                &role(
                    AuthorityKind::OnPrem,
                    AuthorityParams::Cloud(CloudParams {
                        url: "https://api.example.com".into(),
                        zone: "App\\Default".into(),
                    }),
                ),
                &Credential::default(),
            )
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedAuthority { .. }));
    }
}
