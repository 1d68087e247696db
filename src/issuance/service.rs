//! Issuance and signing orchestration.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{field, info, warn, Instrument, Span};

use super::request::{CertificateBundle, IssuanceRequest, Lease, SigningRequest};
use crate::certificates::{
    build_csr, encrypt_private_key, generate_key, normalize_serial, private_key_pem,
    validate_issued, validate_signed, CsrSubject, ParsedCertificate, ValidationPolicy,
};
use crate::config::AppConfig;
use crate::connectors::{
    Connector, ConnectorBuilder, ConnectorError, ConnectorFactory, ConnectorResult,
    EnrollmentRequest, KeyOrigin,
};
use crate::errors::{Error, Result};
use crate::roles::{Credential, ResolvedRole, RoleConfig, RoleRegistry};
use crate::tokens::{AccessTokenManager, TokenState};

/// A resolved role with the connector currently used for it.
struct Session {
    role: RoleConfig,
    credential: Credential,
    connector: Arc<dyn Connector>,
}

type WrapError = fn(String, ConnectorError) -> Error;

/// Drives enrollment and signing for stored roles.
pub struct IssuanceService {
    config: Arc<AppConfig>,
    registry: RoleRegistry,
    builder: Arc<dyn ConnectorBuilder>,
    tokens: AccessTokenManager,
}

impl std::fmt::Debug for IssuanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceService")
            .field("registry", &self.registry)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl IssuanceService {
    pub fn new(
        config: Arc<AppConfig>,
        registry: RoleRegistry,
        builder: Arc<dyn ConnectorBuilder>,
    ) -> Self {
        let tokens = AccessTokenManager::new(registry.clone(), config.tokens.refresh_margin());
        Self { config, registry, builder, tokens }
    }

    /// Service using the built-in connectors.
    pub fn with_default_connectors(config: Arc<AppConfig>, registry: RoleRegistry) -> Self {
        let builder = Arc::new(ConnectorFactory::new(config.clone()));
        Self::new(config, registry, builder)
    }

    pub fn tokens(&self) -> &AccessTokenManager {
        &self.tokens
    }

    /// Issue a new certificate and key for `role`.
    pub async fn issue(&self, role: &str, request: &IssuanceRequest) -> Result<CertificateBundle> {
        let span = crate::issuance_span!("issue", role, cn = %request.common_name);
        self.issue_inner(role, request).instrument(span).await
    }

    /// Have `role`'s authority sign a caller CSR.
    pub async fn sign(&self, role: &str, request: &SigningRequest) -> Result<CertificateBundle> {
        let span = crate::issuance_span!("sign", role);
        self.sign_inner(role, request).instrument(span).await
    }

    /// [`issue`](Self::issue), aborted when `cancel` fires.
    pub async fn issue_with_cancellation(
        &self,
        role: &str,
        request: &IssuanceRequest,
        cancel: &CancellationToken,
    ) -> Result<CertificateBundle> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { operation: "issue" }),
            result = self.issue(role, request) => result,
        }
    }

    /// [`sign`](Self::sign), aborted when `cancel` fires.
    pub async fn sign_with_cancellation(
        &self,
        role: &str,
        request: &SigningRequest,
        cancel: &CancellationToken,
    ) -> Result<CertificateBundle> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { operation: "sign" }),
            result = self.sign(role, request) => result,
        }
    }

    async fn issue_inner(&self, role_name: &str, request: &IssuanceRequest) -> Result<CertificateBundle> {
        let mut session = self.open(role_name).await?;
        let ip_sans_supported = session.connector.supports_ip_sans();
        let ip_addresses = if ip_sans_supported {
            request.ip_addresses.clone()
        } else {
            if !request.ip_addresses.is_empty() {
                warn!(
                    dropped = request.ip_addresses.len(),
                    "Authority does not support IP SANs; dropping them from the request"
                );
            }
            Vec::new()
        };

        let mut enrollment = EnrollmentRequest {
            common_name: request.common_name.clone(),
            dns_names: request.csr_dns_names(),
            ip_addresses,
            email_addresses: request.email_addresses.clone(),
            organization: request.organization.clone(),
            csr: None,
        };

        let local_key = match session.connector.key_origin() {
            KeyOrigin::Local => {
                let key_type = request.key_type.unwrap_or(session.role.key_type);
                let key = tokio::task::spawn_blocking(move || generate_key(key_type))
                    .await
                    .map_err(|e| Error::key_material(format!("key generation task failed: {}", e)))??;
                enrollment.csr = Some(build_csr(
                    &CsrSubject {
                        common_name: enrollment.common_name.clone(),
                        organization: enrollment.organization.clone(),
                        dns_names: enrollment.dns_names.clone(),
                        ip_addresses: enrollment.ip_addresses.clone(),
                        email_addresses: enrollment.email_addresses.clone(),
                    },
                    &key,
                )?);
                Some(private_key_pem(&key))
            }
            KeyOrigin::Service => None,
        };

        let enrollment = &enrollment;
        let response = self
            .call_with_refresh(
                &mut session,
                move |connector| async move { connector.enroll(enrollment).await },
                |role, source| Error::IssuanceFailed { role, source },
            )
            .await?;

        if response.certificate.trim().is_empty() {
            return Err(Error::EmptyResponse { operation: "issue", what: "certificate" });
        }
        let private_key = match local_key.or(response.private_key) {
            Some(key) => key,
            None => return Err(Error::EmptyResponse { operation: "issue", what: "private key" }),
        };

        let mut bundle = CertificateBundle {
            certificate: response.certificate,
            chain: response.chain,
            private_key: Some(private_key),
            ..Default::default()
        };

        let parsed = validate_issued(&bundle, request, &self.policy(&session, ip_sans_supported))?;
        self.finish(&mut bundle, &session.role, &parsed);

        if let (Some(passphrase), Some(key)) = (&request.key_password, &bundle.private_key) {
            bundle.private_key =
                Some(encrypt_private_key(key.expose_secret(), passphrase.expose_secret())?);
            bundle.private_key_encrypted = true;
        }

        info!(serial = %bundle.serial_number, "Certificate issued");
        Ok(bundle)
    }

    async fn sign_inner(&self, role_name: &str, request: &SigningRequest) -> Result<CertificateBundle> {
        let mut session = self.open(role_name).await?;
        let ip_sans_supported = session.connector.supports_ip_sans();
        if !ip_sans_supported && !request.csr.subject.ip_addresses.is_empty() {
            warn!("Authority does not support IP SANs; CSR IP addresses will not be checked");
        }

        let csr_pem = request.csr.pem.as_str();
        let response = self
            .call_with_refresh(
                &mut session,
                move |connector| async move { connector.sign(csr_pem).await },
                |role, source| Error::SigningFailed { role, source },
            )
            .await?;

        if response.certificate.trim().is_empty() {
            return Err(Error::EmptyResponse { operation: "sign", what: "certificate" });
        }

        let digest = ring::digest::digest(&ring::digest::SHA256, &request.csr.public_key.spki_der);
        let mut bundle = CertificateBundle {
            certificate: response.certificate,
            chain: response.chain,
            csr_key_id: Some(hex::encode(digest.as_ref())),
            ..Default::default()
        };

        let parsed = validate_signed(&bundle, request, &self.policy(&session, ip_sans_supported))?;
        self.finish(&mut bundle, &session.role, &parsed);

        info!(serial = %bundle.serial_number, "CSR signed");
        Ok(bundle)
    }

    fn policy(&self, session: &Session, ip_sans_supported: bool) -> ValidationPolicy {
        ValidationPolicy {
            ip_sans_supported,
            expected_issuer: self
                .config
                .authorities
                .expected_issuer(session.role.kind)
                .map(str::to_string),
        }
    }

    fn finish(&self, bundle: &mut CertificateBundle, role: &RoleConfig, parsed: &ParsedCertificate) {
        bundle.serial_number = parsed.serial_number.clone();
        if role.generate_lease {
            bundle.lease = Some(Lease {
                lease_id: normalize_serial(&parsed.serial_number),
                expires_at: parsed.not_after,
            });
        }
    }

    /// Resolve the role, build its connector and refresh an expiring token
    /// before first use.
    async fn open(&self, role_name: &str) -> Result<Session> {
        let ResolvedRole { role, credential } = self.registry.resolve(role_name).await?;
        Span::current().record("authority", field::display(role.kind));

        let connector = self.builder.build(&role, &credential)?;
        let mut session = Session { role, credential, connector };

        let expiring = session.role.kind.uses_bearer_tokens()
            && session.credential.has_refresh_token()
            && session
                .credential
                .tokens
                .as_ref()
                .is_some_and(|pair| self.tokens.assess(pair, Utc::now()) == TokenState::Expiring);
        if expiring {
            if let Some(reference) = session.role.credential_ref.clone() {
                info!("Access token near expiry, refreshing before use");
                self.refresh_session(&mut session, &reference).await?;
            }
        }
        Ok(session)
    }

    async fn refresh_session(&self, session: &mut Session, reference: &str) -> Result<()> {
        let observed = session.credential.tokens.clone();
        let pair = self
            .tokens
            .refresh(session.connector.as_ref(), reference, observed.as_ref())
            .await?;
        session.credential.tokens = Some(pair);
        session.connector = self.builder.build(&session.role, &session.credential)?;
        Ok(())
    }

    /// Run `call`; when the authority reports an expired token, refresh it
    /// and run `call` exactly once more.
    async fn call_with_refresh<T, F, Fut>(
        &self,
        session: &mut Session,
        call: F,
        wrap: WrapError,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn Connector>) -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        let error = match call(session.connector.clone()).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let reference = match &session.role.credential_ref {
            Some(reference) if error.is_refreshable() && session.role.kind.uses_bearer_tokens() => {
                reference.clone()
            }
            _ => return Err(wrap(session.role.name.clone(), error)),
        };
        if !session.credential.has_refresh_token() {
            return Err(Error::Authentication { role: session.role.name.clone(), source: error });
        }

        info!(error = %error, "Access token rejected, refreshing and retrying once");
        self.refresh_session(session, &reference).await?;

        call(session.connector.clone())
            .await
            .map_err(|error| wrap(session.role.name.clone(), error))
    }
}
