//! On-prem enrollment service connector.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{TimeZone, Utc};
use rand::RngCore;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use url::Url;

use super::{
    error_message, split_pem_bundle, Connector, ConnectorError, ConnectorResult,
    EnrollmentRequest, EnrollmentResponse, KeyOrigin, RefreshRequest, RetrievalSchedule,
    TokenResponse,
};
use crate::certificates::{decrypt_private_key, is_encrypted_key, parse_csr};
use crate::config::TransportConfig;
use crate::errors::{Error, Result};
use crate::roles::{AuthorityKind, Credential, OnPremParams};
use crate::secrets::SecretString;
use crate::transport::build_http_client;

const API_KEY_HEADER: &str = "X-Venafi-Api-Key";
const POLICY_ROOT: &str = "\\VED\\Policy";

const SAN_TYPE_EMAIL: u8 = 1;
const SAN_TYPE_DNS: u8 = 2;
const SAN_TYPE_IP: u8 = 7;

enum TppAuth {
    Bearer(SecretString),
    Password { username: String, password: SecretString },
}

/// Connector for the on-prem enrollment service.
///
/// Authenticates with a bearer token when the credential carries one, and
/// falls back to a session key obtained with username and password.
pub struct TppConnector {
    kind: AuthorityKind,
    client: reqwest::Client,
    root: Url,
    policy_dn: String,
    auth: TppAuth,
    service_generated: bool,
    schedule: RetrievalSchedule,
    session_key: OnceCell<SecretString>,
}

impl std::fmt::Debug for TppConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TppConnector")
            .field("kind", &self.kind)
            .field("root", &self.root.as_str())
            .field("policy_dn", &self.policy_dn)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct AuthorizeBody<'a> {
    #[serde(rename = "Username")]
    username: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthorizeResponse {
    #[serde(rename = "APIKey")]
    api_key: String,
}

#[derive(Serialize)]
struct SanEntry {
    #[serde(rename = "Type")]
    kind: u8,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Serialize)]
struct CertificateRequestBody<'a> {
    #[serde(rename = "PolicyDN")]
    policy_dn: &'a str,
    #[serde(rename = "ObjectName")]
    object_name: &'a str,
    #[serde(rename = "PKCS10", skip_serializing_if = "Option::is_none")]
    pkcs10: Option<&'a str>,
    #[serde(rename = "Subject", skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    #[serde(rename = "Organization", skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    #[serde(rename = "SubjectAltNames", skip_serializing_if = "Vec::is_empty")]
    subject_alt_names: Vec<SanEntry>,
    #[serde(rename = "DisableAutomaticRenewal")]
    disable_automatic_renewal: bool,
}

#[derive(Deserialize)]
struct CertificateRequestResponse {
    #[serde(rename = "CertificateDN")]
    certificate_dn: String,
}

#[derive(Serialize)]
struct RetrieveBody<'a> {
    #[serde(rename = "CertificateDN")]
    certificate_dn: &'a str,
    #[serde(rename = "Format")]
    format: &'a str,
    #[serde(rename = "IncludeChain")]
    include_chain: bool,
    #[serde(rename = "RootFirstOrder")]
    root_first_order: bool,
    #[serde(rename = "IncludePrivateKey")]
    include_private_key: bool,
    #[serde(rename = "Password", skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(rename = "CertificateData", default)]
    certificate_data: String,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
    client_id: &'a str,
    scope: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    /// Expiry as seconds since the epoch
    #[serde(default)]
    expires: Option<i64>,
}

/// Service root from a configured URL, tolerating a trailing `vedsdk` segment.
fn service_root(raw: &str) -> std::result::Result<Url, String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(format!("unsupported URL scheme '{}'", url.scheme()));
    }

    let path = url.path().trim_end_matches('/');
    let path = path.strip_suffix("/vedsdk").unwrap_or(path).to_string();
    url.set_path(&format!("{}/", path.trim_end_matches('/')));
    url.set_query(None);
    Ok(url)
}

fn policy_dn(zone: &str) -> String {
    if zone.starts_with(POLICY_ROOT) {
        zone.to_string()
    } else {
        format!("{}\\{}", POLICY_ROOT, zone.trim_start_matches('\\'))
    }
}

fn one_time_password() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Character-class requirements of the service's password policy.
    format!("{}Aa1!", STANDARD.encode(bytes))
}

impl TppConnector {
    pub fn new(
        kind: AuthorityKind,
        params: &OnPremParams,
        credential: &Credential,
        transport: &TransportConfig,
    ) -> Result<Self> {
        let root = service_root(&params.url).map_err(|e| Error::connector_init(kind, e))?;

        let auth = match (&credential.tokens, &credential.username, &credential.password) {
            (Some(tokens), _, _) if !tokens.access_token.is_blank() => {
                TppAuth::Bearer(tokens.access_token.clone())
            }
            (_, Some(username), Some(password)) => {
                TppAuth::Password { username: username.clone(), password: password.clone() }
            }
            _ => {
                return Err(Error::connector_init(
                    kind,
                    "credential has neither an access token nor a username and password",
                ))
            }
        };

        let client = build_http_client(transport, credential.trust_bundle_pem.as_deref())?;

        Ok(Self {
            kind,
            client,
            root,
            policy_dn: policy_dn(&params.zone),
            auth,
            service_generated: params.service_generated_cert,
            schedule: RetrievalSchedule {
                interval: transport.retrieval_poll_interval(),
                deadline: transport.retrieval_deadline(),
            },
            session_key: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> ConnectorResult<Url> {
        self.root
            .join(path)
            .map_err(|e| ConnectorError::InvalidRequest(format!("bad endpoint {}: {}", path, e)))
    }

    async fn session_key(&self, username: &str, password: &SecretString) -> ConnectorResult<&SecretString> {
        self.session_key
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(self.endpoint("vedsdk/authorize/")?)
                    .json(&AuthorizeBody { username, password: password.expose_secret() })
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let message = error_message(&response.text().await.unwrap_or_default());
                    return Err(if status == StatusCode::UNAUTHORIZED {
                        ConnectorError::AuthenticationRejected(message)
                    } else {
                        ConnectorError::Upstream { status: status.as_u16(), message }
                    });
                }

                let body: AuthorizeResponse = response.json().await?;
                debug!(authority = %self.kind, "Obtained session key");
                Ok(SecretString::new(body.api_key))
            })
            .await
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> ConnectorResult<reqwest::Response> {
        let request = self.client.post(self.endpoint(path)?).json(body);
        let request = match &self.auth {
            TppAuth::Bearer(token) => request.bearer_auth(token.expose_secret()),
            TppAuth::Password { username, password } => {
                let key = self.session_key(username, password).await?;
                request.header(API_KEY_HEADER, key.expose_secret())
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(&response.text().await.unwrap_or_default());
        Err(match (status, &self.auth) {
            (StatusCode::UNAUTHORIZED, TppAuth::Bearer(_)) => {
                ConnectorError::AuthenticationExpired(message)
            }
            (StatusCode::UNAUTHORIZED, TppAuth::Password { .. }) => {
                ConnectorError::AuthenticationRejected(message)
            }
            _ => ConnectorError::Upstream { status: status.as_u16(), message },
        })
    }

    async fn request_certificate(&self, body: &CertificateRequestBody<'_>) -> ConnectorResult<String> {
        let response: CertificateRequestResponse =
            self.post("vedsdk/certificates/request", body).await?.json().await?;
        info!(authority = %self.kind, certificate_dn = %response.certificate_dn, "Certificate requested");
        Ok(response.certificate_dn)
    }

    /// Retrieve an issued certificate, polling while the service reports it
    /// as pending.
    async fn retrieve(
        &self,
        certificate_dn: &str,
        key_password: Option<&str>,
    ) -> ConnectorResult<EnrollmentResponse> {
        let body = RetrieveBody {
            certificate_dn,
            format: if key_password.is_some() { "Base64 (PKCS #8)" } else { "Base64" },
            include_chain: true,
            root_first_order: false,
            include_private_key: key_password.is_some(),
            password: key_password,
        };

        let started = Instant::now();
        let retrieved = loop {
            let response = self.post("vedsdk/certificates/retrieve", &body).await?;
            if response.status() != StatusCode::ACCEPTED {
                break response.json::<RetrieveResponse>().await?;
            }
            if started.elapsed() + self.schedule.interval > self.schedule.deadline {
                return Err(ConnectorError::Pending {
                    reference: certificate_dn.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            debug!(certificate_dn, "Certificate pending, polling again");
            tokio::time::sleep(self.schedule.interval).await;
        };

        if retrieved.certificate_data.trim().is_empty() {
            return Ok(EnrollmentResponse::default());
        }

        let decoded = STANDARD
            .decode(retrieved.certificate_data.trim())
            .map_err(|e| ConnectorError::InvalidResponse(format!("certificate data is not base64: {}", e)))?;
        let text = String::from_utf8(decoded)
            .map_err(|_| ConnectorError::InvalidResponse("certificate data is not PEM text".into()))?;

        let (certificate, chain, private_key) = split_pem_bundle(&text)?;
        let private_key = match (private_key, key_password) {
            (Some(key), Some(password)) if is_encrypted_key(key.expose_secret()) => Some(
                decrypt_private_key(key.expose_secret(), password).map_err(|e| {
                    ConnectorError::InvalidResponse(format!("returned key unusable: {}", e))
                })?,
            ),
            (key, _) => key,
        };

        Ok(EnrollmentResponse { certificate, chain, private_key })
    }
}

#[async_trait]
impl Connector for TppConnector {
    fn authority(&self) -> AuthorityKind {
        self.kind
    }

    fn key_origin(&self) -> KeyOrigin {
        if self.service_generated {
            KeyOrigin::Service
        } else {
            KeyOrigin::Local
        }
    }

    #[instrument(skip_all, fields(authority = %self.kind, cn = %request.common_name))]
    async fn enroll(&self, request: &EnrollmentRequest) -> ConnectorResult<EnrollmentResponse> {
        if let Some(csr) = &request.csr {
            let body = CertificateRequestBody {
                policy_dn: &self.policy_dn,
                object_name: &request.common_name,
                pkcs10: Some(csr),
                subject: None,
                organization: None,
                subject_alt_names: Vec::new(),
                disable_automatic_renewal: true,
            };
            let certificate_dn = self.request_certificate(&body).await?;
            return self.retrieve(&certificate_dn, None).await;
        }

        let subject_alt_names = request
            .dns_names
            .iter()
            .map(|name| SanEntry { kind: SAN_TYPE_DNS, name: name.clone() })
            .chain(request.ip_addresses.iter().map(|ip| SanEntry { kind: SAN_TYPE_IP, name: ip.to_string() }))
            .chain(
                request
                    .email_addresses
                    .iter()
                    .map(|email| SanEntry { kind: SAN_TYPE_EMAIL, name: email.clone() }),
            )
            .collect();

        let body = CertificateRequestBody {
            policy_dn: &self.policy_dn,
            object_name: &request.common_name,
            pkcs10: None,
            subject: Some(&request.common_name),
            organization: request.organization.as_deref(),
            subject_alt_names,
            disable_automatic_renewal: true,
        };
        let certificate_dn = self.request_certificate(&body).await?;
        let password = one_time_password();
        self.retrieve(&certificate_dn, Some(&password)).await
    }

    #[instrument(skip_all, fields(authority = %self.kind))]
    async fn sign(&self, csr_pem: &str) -> ConnectorResult<EnrollmentResponse> {
        let csr = parse_csr(csr_pem).map_err(|e| ConnectorError::InvalidRequest(e.to_string()))?;
        let object_name = csr
            .subject
            .common_name
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let body = CertificateRequestBody {
            policy_dn: &self.policy_dn,
            object_name: &object_name,
            pkcs10: Some(csr_pem),
            subject: None,
            organization: None,
            subject_alt_names: Vec::new(),
            disable_automatic_renewal: true,
        };
        let certificate_dn = self.request_certificate(&body).await?;
        self.retrieve(&certificate_dn, None).await
    }

    #[instrument(skip_all, fields(authority = %self.kind))]
    async fn refresh_access_token(&self, request: &RefreshRequest) -> ConnectorResult<TokenResponse> {
        let response = self
            .client
            .post(self.endpoint("vedauth/authorize/token")?)
            .json(&RefreshBody {
                refresh_token: request.refresh_token.expose_secret(),
                client_id: request.client_id,
                scope: request.scope,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(&response.text().await.unwrap_or_default());
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ConnectorError::AuthenticationRejected(message)
                }
                _ => ConnectorError::Upstream { status: status.as_u16(), message },
            });
        }

        let body: RefreshResponse = response.json().await?;
        Ok(TokenResponse {
            access_token: SecretString::new(body.access_token),
            refresh_token: SecretString::new(body.refresh_token),
            expires_at: body.expires.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        })
    }
}
