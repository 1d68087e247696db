//! In-process authority for development and tests.
//!
//! Holds a self-signed EC CA generated at startup and signs CSRs locally.
//! Nothing is persisted; restarting the process rotates the CA.

use async_trait::async_trait;
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument};

use super::{
    Connector, ConnectorError, ConnectorResult, EnrollmentRequest, EnrollmentResponse,
    RefreshRequest, TokenResponse,
};
use crate::certificates::parse_csr;
use crate::errors::{Error, Result};
use crate::roles::{AuthorityKind, FakeParams};

pub const DEFAULT_FAKE_ISSUER_CN: &str = "Certbroker Fake Issuing CA";

const CA_VALIDITY_DAYS: i64 = 3650;

pub struct FakeAuthority {
    common_name: String,
    certificate: Certificate,
    key: KeyPair,
}

impl std::fmt::Debug for FakeAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeAuthority").field("common_name", &self.common_name).finish()
    }
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Positive INTEGER encoding.
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes.to_vec())
}

impl FakeAuthority {
    pub fn new(common_name: Option<&str>) -> Result<Self> {
        let common_name = common_name.unwrap_or(DEFAULT_FAKE_ISSUER_CN).to_string();
        let key = KeyPair::generate()
            .map_err(|e| Error::connector_init(AuthorityKind::Fake, format!("CA key: {}", e)))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name.as_str());
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.serial_number = Some(random_serial());
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::minutes(1);
        params.not_after = now + Duration::days(CA_VALIDITY_DAYS);

        let certificate = params
            .self_signed(&key)
            .map_err(|e| Error::connector_init(AuthorityKind::Fake, format!("CA certificate: {}", e)))?;

        debug!(issuer = %common_name, "Generated fake issuing CA");
        Ok(Self { common_name, certificate, key })
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn certificate_pem(&self) -> String {
        self.certificate.pem()
    }

    /// Sign a CSR. The common name is always present among the DNS SANs.
    pub fn sign_csr(&self, csr_pem: &str, validity_days: u32) -> ConnectorResult<String> {
        let parsed = parse_csr(csr_pem).map_err(|e| ConnectorError::InvalidRequest(e.to_string()))?;
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| ConnectorError::InvalidRequest(format!("unsupported CSR: {}", e)))?;

        if let Some(cn) = &parsed.subject.common_name {
            if !parsed.subject.dns_names.iter().any(|name| name == cn) {
                let name = Ia5String::try_from(cn.as_str()).map_err(|_| {
                    ConnectorError::InvalidRequest(format!("'{}' is not a valid DNS name", cn))
                })?;
                csr.params.subject_alt_names.push(SanType::DnsName(name));
            }
        }

        let now = OffsetDateTime::now_utc();
        csr.params.not_before = now - Duration::minutes(1);
        csr.params.not_after = now + Duration::days(i64::from(validity_days.max(1)));
        csr.params.serial_number = Some(random_serial());
        csr.params.is_ca = IsCa::ExplicitNoCa;

        let issued = csr
            .signed_by(&self.certificate, &self.key)
            .map_err(|e| ConnectorError::InvalidResponse(format!("fake signing failed: {}", e)))?;
        Ok(issued.pem())
    }
}

/// Connector backed by a shared [`FakeAuthority`].
#[derive(Debug, Clone)]
pub struct FakeConnector {
    authority: Arc<FakeAuthority>,
    validity_days: u32,
}

impl FakeConnector {
    pub fn new(authority: Arc<FakeAuthority>, params: &FakeParams) -> Self {
        Self { authority, validity_days: params.validity_days }
    }

    fn respond(&self, csr_pem: &str) -> ConnectorResult<EnrollmentResponse> {
        Ok(EnrollmentResponse {
            certificate: self.authority.sign_csr(csr_pem, self.validity_days)?,
            chain: vec![self.authority.certificate_pem()],
            private_key: None,
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn authority(&self) -> AuthorityKind {
        AuthorityKind::Fake
    }

    #[instrument(skip_all, fields(authority = "fake", cn = %request.common_name))]
    async fn enroll(&self, request: &EnrollmentRequest) -> ConnectorResult<EnrollmentResponse> {
        let csr = request.csr.as_deref().ok_or_else(|| {
            ConnectorError::InvalidRequest("fake authority only signs CSRs".into())
        })?;
        self.respond(csr)
    }

    #[instrument(skip_all, fields(authority = "fake"))]
    async fn sign(&self, csr_pem: &str) -> ConnectorResult<EnrollmentResponse> {
        self.respond(csr_pem)
    }

    async fn refresh_access_token(&self, _request: &RefreshRequest) -> ConnectorResult<TokenResponse> {
        Err(ConnectorError::Unsupported {
            authority: AuthorityKind::Fake.to_string(),
            operation: "refresh_access_token",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::{build_csr, generate_key, parse_certificate_pem, CsrSubject, KeyType};

    #[tokio::test]
    async fn signs_with_common_name_in_sans() {
        let authority = Arc::new(FakeAuthority::new(Some("Test Fake CA")).unwrap());
        let connector = FakeConnector::new(authority.clone(), &FakeParams::default());

        let key = generate_key(KeyType::EcdsaP256).unwrap();
        let csr = build_csr(
            &CsrSubject {
                common_name: "app.example.com".into(),
                dns_names: vec!["www.example.com".into()],
                ..Default::default()
            },
            &key,
        )
        .unwrap();

        let response = connector.sign(&csr).await.unwrap();
        let parsed = parse_certificate_pem(&response.certificate).unwrap();
        assert_eq!(parsed.issuer_common_name.as_deref(), Some("Test Fake CA"));
        assert!(parsed.subject.dns_names.contains(&"app.example.com".to_string()));
        assert!(parsed.subject.dns_names.contains(&"www.example.com".to_string()));
        assert_eq!(response.chain, vec![authority.certificate_pem()]);
    }

    #[tokio::test]
    async fn enroll_without_csr_is_rejected() {
        let authority = Arc::new(FakeAuthority::new(None).unwrap());
        assert_eq!(authority.common_name(), DEFAULT_FAKE_ISSUER_CN);
        let connector = FakeConnector::new(authority, &FakeParams::default());

        let err = connector
            .enroll(&EnrollmentRequest { common_name: "x.example.com".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }
}
