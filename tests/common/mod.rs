//! Common test utilities for all integration tests.
//!
//! Provides in-memory registries, a stand-in CA and scripted connectors.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use certbroker::config::AppConfig;
use certbroker::connectors::{
    Connector, ConnectorBuilder, ConnectorError, ConnectorResult, EnrollmentRequest,
    EnrollmentResponse, FakeAuthority, RefreshRequest, TokenResponse,
};
use certbroker::errors::{Error, Result};
use certbroker::issuance::IssuanceService;
use certbroker::roles::{AuthorityKind, Credential, RoleConfig, RoleRegistry, RoleRequest};
use certbroker::secrets::SecretString;
use certbroker::storage::{InMemoryStorage, Storage, StorageEntry};
use chrono::{Duration, Utc};

pub const TEST_ISSUER_CN: &str = "Certbroker Test Issuing CA";

/// Configuration with short polling so pending retrievals finish quickly.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.transport.retrieval_poll_interval_ms = 20;
    config.transport.retrieval_deadline_seconds = 5;
    config.transport.request_timeout_seconds = 5;
    config
}

pub fn memory_registry() -> RoleRegistry {
    RoleRegistry::new(Arc::new(InMemoryStorage::new()))
}

pub fn test_ca() -> Arc<FakeAuthority> {
    Arc::new(FakeAuthority::new(Some(TEST_ISSUER_CN)).expect("test CA"))
}

/// Service with a single fake-authority role.
pub async fn fake_service(role: &str, generate_lease: bool) -> IssuanceService {
    let registry = memory_registry();
    registry
        .write_role(role, RoleRequest { fakemode: true, generate_lease, ..Default::default() })
        .await
        .expect("fake role");
    IssuanceService::with_default_connectors(Arc::new(test_config()), registry)
}

/// Holds the last submitted CSR and signs it on demand, standing in for an
/// upstream authority behind a mock server.
pub struct CsrSigner {
    ca: Arc<FakeAuthority>,
    csr: Mutex<Option<String>>,
}

impl CsrSigner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { ca: test_ca(), csr: Mutex::new(None) })
    }

    pub fn record(&self, csr: String) {
        *self.csr.lock().unwrap() = Some(csr);
    }

    pub fn submitted(&self) -> Option<String> {
        self.csr.lock().unwrap().clone()
    }

    /// Leaf followed by the issuing CA, as PEM text.
    pub fn issue(&self) -> String {
        let csr = self.submitted().expect("no CSR submitted");
        let leaf = self.ca.sign_csr(&csr, 30).expect("sign CSR");
        format!("{}{}", leaf, self.ca.certificate_pem())
    }
}

/// Scripted authority that only accepts the most recently refreshed token.
pub struct TokenGate {
    ca: Arc<FakeAuthority>,
    accepted: Mutex<String>,
    issued: Mutex<Vec<(String, String)>>,
    reject_everything: AtomicBool,
    pub refresh_calls: AtomicUsize,
    pub enroll_calls: AtomicUsize,
}

impl TokenGate {
    pub fn new(accepted: &str) -> Arc<Self> {
        Arc::new(Self {
            ca: test_ca(),
            accepted: Mutex::new(accepted.to_string()),
            issued: Mutex::new(Vec::new()),
            reject_everything: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            enroll_calls: AtomicUsize::new(0),
        })
    }

    /// Queue the token pair the next refresh returns.
    pub fn next_refresh(&self, access: &str, refresh: &str) {
        self.issued.lock().unwrap().push((access.to_string(), refresh.to_string()));
    }

    /// Make every call fail authentication, even with fresh tokens.
    pub fn reject_all(&self) {
        self.reject_everything.store(true, Ordering::SeqCst);
    }
}

pub struct GatedConnector {
    gate: Arc<TokenGate>,
    presented: String,
}

impl GatedConnector {
    fn check(&self) -> ConnectorResult<()> {
        let accepted = self.gate.accepted.lock().unwrap().clone();
        if self.gate.reject_everything.load(Ordering::SeqCst) || self.presented != accepted {
            return Err(ConnectorError::AuthenticationExpired("token expired".into()));
        }
        Ok(())
    }

    fn respond(&self, csr: &str) -> ConnectorResult<EnrollmentResponse> {
        Ok(EnrollmentResponse {
            certificate: self.gate.ca.sign_csr(csr, 30)?,
            chain: vec![self.gate.ca.certificate_pem()],
            private_key: None,
        })
    }
}

#[async_trait]
impl Connector for GatedConnector {
    fn authority(&self) -> AuthorityKind {
        AuthorityKind::OnPrem
    }

    async fn enroll(&self, request: &EnrollmentRequest) -> ConnectorResult<EnrollmentResponse> {
        self.gate.enroll_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.respond(request.csr.as_deref().unwrap_or_default())
    }

    async fn sign(&self, csr_pem: &str) -> ConnectorResult<EnrollmentResponse> {
        self.gate.enroll_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.respond(csr_pem)
    }

    async fn refresh_access_token(&self, _request: &RefreshRequest) -> ConnectorResult<TokenResponse> {
        self.gate.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.gate.issued.lock().unwrap().pop();
        let (access, refresh) = next
            .ok_or_else(|| ConnectorError::AuthenticationRejected("refresh token revoked".into()))?;
        *self.gate.accepted.lock().unwrap() = access.clone();
        Ok(TokenResponse {
            access_token: SecretString::new(access),
            refresh_token: SecretString::new(refresh),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }
}

/// Builds [`GatedConnector`]s presenting the credential's current token.
pub struct GatedBuilder {
    pub gate: Arc<TokenGate>,
}

impl ConnectorBuilder for GatedBuilder {
    fn build(&self, _role: &RoleConfig, credential: &Credential) -> Result<Arc<dyn Connector>> {
        let presented = credential
            .tokens
            .as_ref()
            .map(|pair| pair.access_token.expose_secret().to_string())
            .unwrap_or_default();
        Ok(Arc::new(GatedConnector { gate: self.gate.clone(), presented }))
    }
}

/// On-prem role request authenticating with a bearer token pair.
pub fn bearer_role(access: &str, refresh: &str) -> RoleRequest {
    RoleRequest {
        authority: Some("onprem".into()),
        tpp_url: Some("https://tpp.example.com".into()),
        zone: Some("DevOps\\Certificates".into()),
        access_token: Some(SecretString::new(access)),
        refresh_token: Some(SecretString::new(refresh)),
        ..Default::default()
    }
}

/// Store that can be told to refuse credential writes.
#[derive(Default)]
pub struct FlakyStorage {
    inner: InMemoryStorage,
    fail_credential_writes: AtomicBool,
}

impl FlakyStorage {
    pub fn fail_credential_writes(&self) {
        self.fail_credential_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        self.inner.get(key).await
    }

    async fn put(&self, entry: StorageEntry) -> Result<()> {
        if entry.key.starts_with("credential/") && self.fail_credential_writes.load(Ordering::SeqCst) {
            return Err(Error::storage("disk full"));
        }
        self.inner.put(entry).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }
}
