//! Role Configuration Registry backed by a [`Storage`] implementation.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::request::RoleRequest;
use super::types::{AuthorityKind, Credential, RoleConfig, TokenPair};
use crate::errors::{Error, Result, TlsError};
use crate::storage::{Storage, StorageEntry};
use crate::transport::load_trust_bundle;

pub const ROLE_ROOT: &str = "role/";
/// Fixed root under which credential records are stored by secret name.
pub const CREDENTIAL_ROOT: &str = "credential/";
/// Reference prefix of credentials written inline with a role. Named
/// credentials cannot contain `/`, so the two never share a key.
pub const INLINE_CREDENTIAL_PREFIX: &str = "role/";

/// Credential reference owned by the role `role`.
pub fn inline_credential_ref(role: &str) -> String {
    format!("{}{}", INLINE_CREDENTIAL_PREFIX, role)
}

fn credential_key(reference: &str) -> String {
    format!("{}{}", CREDENTIAL_ROOT, reference)
}

/// A role together with the credential it references.
#[derive(Debug, Clone)]
pub struct ResolvedRole {
    pub role: RoleConfig,
    pub credential: Credential,
}

/// Maps role names to stored configurations and credentials.
#[derive(Clone)]
pub struct RoleRegistry {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for RoleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleRegistry").finish_non_exhaustive()
    }
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(Error::invalid_role(format!("invalid {} name '{}'", kind, name)));
    }
    Ok(())
}

impl RoleRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Validate a role request, load its trust bundle file and store the
    /// resulting role (and inline credential) records.
    pub async fn write_role(&self, name: &str, request: RoleRequest) -> Result<RoleConfig> {
        check_name("role", name)?;

        let trust_bundle_pem = match &request.trust_bundle_file {
            Some(path) => Some(read_trust_bundle(path).await?),
            None => None,
        };

        let (role, credential) = request.into_role(name, trust_bundle_pem)?;
        let inline_key = credential_key(&inline_credential_ref(name));
        match credential {
            Some(credential) => self.storage.put(StorageEntry::json(inline_key, &credential)?).await?,
            // A role switched to a shared credential drops its old inline one.
            None => self.storage.delete(&inline_key).await?,
        }
        self.put_role(&role).await?;

        info!(role = %role.name, authority = %role.kind, "Role written");
        Ok(role)
    }

    pub async fn put_role(&self, role: &RoleConfig) -> Result<()> {
        check_name("role", &role.name)?;
        self.storage.put(StorageEntry::json(format!("{}{}", ROLE_ROOT, role.name), role)?).await
    }

    /// # Errors
    ///
    /// [`Error::UnknownRole`] when nothing is stored under `name`.
    pub async fn get_role(&self, name: &str) -> Result<RoleConfig> {
        self.storage
            .get(&format!("{}{}", ROLE_ROOT, name))
            .await?
            .ok_or_else(|| Error::UnknownRole { role: name.to_string() })?
            .decode()
    }

    /// Delete a role and the credential written inline with it. Shared
    /// credentials it referenced are left in place.
    pub async fn delete_role(&self, name: &str) -> Result<()> {
        self.storage.delete(&format!("{}{}", ROLE_ROOT, name)).await?;
        self.storage.delete(&credential_key(&inline_credential_ref(name))).await?;
        debug!(role = %name, "Role deleted");
        Ok(())
    }

    pub async fn list_roles(&self) -> Result<Vec<String>> {
        self.storage.list(ROLE_ROOT).await
    }

    /// Write a credential record, replacing any existing one.
    pub async fn put_credential(&self, name: &str, credential: &Credential) -> Result<()> {
        check_name("credential", name)?;
        if let Some(pem) = &credential.trust_bundle_pem {
            load_trust_bundle(pem)?;
        }
        self.storage
            .put(StorageEntry::json(credential_key(name), credential)?)
            .await
    }

    /// Load a credential on behalf of `role`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingCredential`] when the reference is dangling.
    pub async fn get_credential(&self, role: &str, name: &str) -> Result<Credential> {
        self.storage
            .get(&credential_key(name))
            .await?
            .ok_or_else(|| Error::MissingCredential {
                role: role.to_string(),
                reference: name.to_string(),
            })?
            .decode()
    }

    /// Resolve a role name to its configuration and credential.
    pub async fn resolve(&self, name: &str) -> Result<ResolvedRole> {
        let role = self.get_role(name).await?;
        let credential = match (&role.credential_ref, role.kind) {
            (Some(reference), _) => self.get_credential(name, reference).await?,
            (None, AuthorityKind::Fake) => Credential::default(),
            (None, _) => {
                return Err(Error::MissingCredential {
                    role: name.to_string(),
                    reference: String::new(),
                })
            }
        };
        Ok(ResolvedRole { role, credential })
    }

    /// Replace the token pair of a stored credential.
    ///
    /// Both tokens are written in one overwrite of the credential record; a
    /// concurrent writer for the same credential in another process wins or
    /// loses wholesale.
    pub async fn store_token_pair(&self, name: &str, tokens: &TokenPair) -> Result<()> {
        let mut credential = self.get_credential(name, name).await?;
        credential.tokens = Some(tokens.clone());
        self.storage
            .put(StorageEntry::json(credential_key(name), &credential)?)
            .await
    }

    /// Current token pair of a credential, if it has one.
    pub async fn token_pair(&self, name: &str) -> Result<Option<TokenPair>> {
        Ok(self.get_credential(name, name).await?.tokens)
    }
}

async fn read_trust_bundle(path: &Path) -> Result<String> {
    let pem = tokio::fs::read_to_string(path).await.map_err(|source| {
        Error::InvalidTrustBundle(TlsError::BundleReadError { path: path.to_path_buf(), source })
    })?;
    load_trust_bundle(&pem)?;
    Ok(pem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::AuthorityParams;
    use crate::storage::InMemoryStorage;

    fn registry() -> RoleRegistry {
        RoleRegistry::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_unknown_role() {
        let err = registry().resolve("missing").await.unwrap_err();
        assert!(matches!(err, Error::UnknownRole { role } if role == "missing"));
    }

    #[tokio::test]
    async fn test_fake_role_resolves_without_credential() {
        let registry = registry();
        let role = registry
            .write_role("test", RoleRequest { fakemode: true, ..Default::default() })
            .await
            .unwrap();
        assert!(matches!(role.params, AuthorityParams::Fake(_)));

        let resolved = registry.resolve("test").await.unwrap();
        assert!(resolved.credential.is_empty());
        assert_eq!(registry.list_roles().await.unwrap(), vec!["test"]);
    }

    #[tokio::test]
    async fn test_dangling_reference_is_missing_credential() {
        let registry = registry();
        registry
            .write_role(
                "web",
                RoleRequest {
                    apikey: None,
                    cloud_url: Some("https://api.venafi.cloud".into()),
                    zone: Some("app\\tpl".into()),
                    credential: Some("shared".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = registry.resolve("web").await.unwrap_err();
        assert!(
            matches!(err, Error::MissingCredential { ref reference, .. } if reference == "shared")
        );
    }

    #[tokio::test]
    async fn test_store_token_pair_replaces_both() {
        let registry = registry();
        registry
            .put_credential(
                "web",
                &Credential {
                    username: Some("admin".into()),
                    tokens: Some(TokenPair::new("a1", "r1", None)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        registry.store_token_pair("web", &TokenPair::new("a2", "r2", None)).await.unwrap();

        let credential = registry.get_credential("web", "web").await.unwrap();
        let tokens = credential.tokens.unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "a2");
        assert_eq!(tokens.refresh_token.expose_secret(), "r2");
        assert_eq!(credential.username.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_unreadable_trust_bundle_file() {
        let request = RoleRequest {
            tpp_url: Some("https://tpp.example.com".into()),
            access_token: Some("at".into()),
            zone: Some("z".into()),
            trust_bundle_file: Some("/nonexistent/bundle.pem".into()),
            ..Default::default()
        };
        let err = registry().write_role("web", request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTrustBundle(TlsError::BundleReadError { .. })));
    }

    fn cloud_role(apikey: Option<&str>, credential: Option<&str>) -> RoleRequest {
        RoleRequest {
            cloud_url: Some("https://api.venafi.cloud".into()),
            zone: Some("app\\tpl".into()),
            apikey: apikey.map(Into::into),
            credential: credential.map(Into::into),
            ..Default::default()
        }
    }

    fn shared_key(key: &str) -> Credential {
        Credential { api_key: Some(key.into()), ..Default::default() }
    }

    #[tokio::test]
    async fn test_inline_credential_does_not_replace_shared() {
        let registry = registry();
        registry.put_credential("shared", &shared_key("team-key")).await.unwrap();
        registry.write_role("web", cloud_role(None, Some("shared"))).await.unwrap();

        let role = registry.write_role("shared", cloud_role(Some("other-key"), None)).await.unwrap();
        assert_eq!(role.credential_ref.as_deref(), Some("role/shared"));

        let web = registry.resolve("web").await.unwrap();
        assert_eq!(web.credential.api_key.unwrap().expose_secret(), "team-key");
        let own = registry.resolve("shared").await.unwrap();
        assert_eq!(own.credential.api_key.unwrap().expose_secret(), "other-key");
    }

    #[tokio::test]
    async fn test_delete_role_removes_inline_credential_only() {
        let registry = registry();
        registry.put_credential("shared", &shared_key("team-key")).await.unwrap();
        registry.write_role("web", cloud_role(None, Some("shared"))).await.unwrap();
        registry.write_role("shared", cloud_role(Some("other-key"), None)).await.unwrap();

        registry.delete_role("shared").await.unwrap();
        assert!(matches!(
            registry.get_credential("shared", "role/shared").await.unwrap_err(),
            Error::MissingCredential { .. }
        ));

        registry.delete_role("web").await.unwrap();
        let shared = registry.get_credential("web", "shared").await.unwrap();
        assert_eq!(shared.api_key.unwrap().expose_secret(), "team-key");
    }

    #[tokio::test]
    async fn test_switch_to_shared_credential_drops_inline() {
        let registry = registry();
        registry.put_credential("shared", &shared_key("team-key")).await.unwrap();
        registry.write_role("web", cloud_role(Some("own-key"), None)).await.unwrap();
        registry.write_role("web", cloud_role(None, Some("shared"))).await.unwrap();

        assert!(registry.get_credential("web", "role/web").await.is_err());
        let web = registry.resolve("web").await.unwrap();
        assert_eq!(web.role.credential_ref.as_deref(), Some("shared"));
        assert_eq!(web.credential.api_key.unwrap().expose_secret(), "team-key");
    }

    #[tokio::test]
    async fn test_role_name_with_slash_rejected() {
        let err = registry()
            .write_role("a/b", RoleRequest { fakemode: true, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRoleConfig { .. }));
    }
}
