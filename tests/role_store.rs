//! Role and credential records in the file-backed store.

mod common;

use std::sync::Arc;

use certbroker::errors::TlsError;
use certbroker::roles::{AuthorityKind, AuthorityParams, RoleRegistry, RoleRequest};
use certbroker::secrets::SecretString;
use certbroker::storage::JsonFileStorage;
use certbroker::Error;
use tempfile::TempDir;

fn file_registry(dir: &TempDir) -> RoleRegistry {
    RoleRegistry::new(Arc::new(JsonFileStorage::new(dir.path().join("store.json"))))
}

fn onprem_request(trust_bundle: std::path::PathBuf) -> RoleRequest {
    RoleRequest {
        tpp_url: Some("https://tpp.example.com/vedsdk".into()),
        tpp_user: Some("admin".into()),
        tpp_password: Some(SecretString::new("secret")),
        zone: Some("DevOps\\Certificates".into()),
        trust_bundle_file: Some(trust_bundle),
        ..Default::default()
    }
}

#[tokio::test]
async fn role_with_trust_bundle_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let bundle_path = dir.path().join("bundle.pem");
    std::fs::write(&bundle_path, common::test_ca().certificate_pem()).unwrap();

    let role = file_registry(&dir).write_role("web", onprem_request(bundle_path)).await.unwrap();
    assert_eq!(role.kind, AuthorityKind::OnPrem);
    assert_eq!(role.credential_ref.as_deref(), Some("role/web"));

    // A second registry over the same file sees the records.
    let reopened = file_registry(&dir);
    assert_eq!(reopened.list_roles().await.unwrap(), vec!["web"]);

    let resolved = reopened.resolve("web").await.unwrap();
    assert!(matches!(resolved.role.params, AuthorityParams::OnPrem(_)));
    assert_eq!(resolved.credential.username.as_deref(), Some("admin"));
    assert_eq!(resolved.credential.password.unwrap().expose_secret(), "secret");
    assert!(resolved.credential.trust_bundle_pem.unwrap().contains("BEGIN CERTIFICATE"));

    // The role record itself carries no secrets.
    let raw = std::fs::read_to_string(dir.path().join("store.json")).unwrap();
    assert!(raw.contains("role/web"));

    reopened.delete_role("web").await.unwrap();
    assert!(matches!(
        reopened.get_role("web").await.unwrap_err(),
        Error::UnknownRole { .. }
    ));
    // Its inline secrets go with it, on disk too.
    let raw = std::fs::read_to_string(dir.path().join("store.json")).unwrap();
    assert!(!raw.contains("credential/role/web"));
}

#[tokio::test]
async fn garbage_trust_bundle_fails_role_write() {
    let dir = TempDir::new().unwrap();
    let bundle_path = dir.path().join("bundle.pem");
    std::fs::write(&bundle_path, "this is not a certificate").unwrap();

    let err = file_registry(&dir)
        .write_role("web", onprem_request(bundle_path))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTrustBundle(TlsError::NoCertificates | TlsError::InvalidPem { .. })
    ));
    assert!(file_registry(&dir).list_roles().await.unwrap().is_empty());
}

#[tokio::test]
async fn restricted_role_requires_zone() {
    let dir = TempDir::new().unwrap();
    let err = file_registry(&dir)
        .write_role(
            "locked",
            RoleRequest {
                authority: Some("cloud_restricted".into()),
                apikey: Some(SecretString::new("key")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRoleConfig { .. }));
}

#[tokio::test]
async fn unsupported_authority_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = file_registry(&dir)
        .write_role(
            "odd",
            RoleRequest { authority: Some("acme".into()), ..Default::default() },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedAuthority { .. }));
}
