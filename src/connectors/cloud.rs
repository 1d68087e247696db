//! SaaS authority connector.

use std::net::IpAddr;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn, Instrument};
use url::Url;

use super::{
    error_message, split_pem_bundle, Connector, ConnectorError, ConnectorResult,
    EnrollmentRequest, EnrollmentResponse, RefreshRequest, RetrievalSchedule, TokenResponse,
};
use crate::config::TransportConfig;
use crate::errors::{Error, Result};
use crate::roles::{AuthorityKind, CloudParams, Credential};
use crate::secrets::SecretString;
use crate::transport::build_http_client;

const API_KEY_HEADER: &str = "tppl-api-key";

/// Connector for the SaaS authority. Authenticates with a static API key.
///
/// The service does not issue IP address SANs; they are dropped from
/// enrollments with a warning.
pub struct CloudConnector {
    kind: AuthorityKind,
    client: reqwest::Client,
    root: Url,
    application: String,
    template_alias: String,
    api_key: SecretString,
    schedule: RetrievalSchedule,
    zone_ids: OnceCell<ZoneIds>,
}

impl std::fmt::Debug for CloudConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConnector")
            .field("kind", &self.kind)
            .field("root", &self.root.as_str())
            .field("application", &self.application)
            .field("template_alias", &self.template_alias)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct ZoneIds {
    application_id: String,
    template_id: String,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificateRequestBody<'a> {
    certificate_signing_request: &'a str,
    application_id: &'a str,
    certificate_issuing_template_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateRequestsEnvelope {
    #[serde(default)]
    certificate_requests: Vec<CertificateRequestStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateRequestStatus {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    certificate_ids: Vec<String>,
    #[serde(default)]
    error_information: Option<serde_json::Value>,
}

/// Split a `app\template` zone into its two halves.
fn split_zone(zone: &str) -> std::result::Result<(String, String), String> {
    match zone.split_once('\\') {
        Some((app, alias)) if !app.trim().is_empty() && !alias.trim().is_empty() => {
            Ok((app.trim().to_string(), alias.trim().to_string()))
        }
        _ => Err(format!("zone '{}' must have the form application\\template", zone)),
    }
}

fn api_root(raw: &str) -> std::result::Result<Url, String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(format!("unsupported URL scheme '{}'", url.scheme()));
    }
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/", path));
    Ok(url)
}

impl CloudConnector {
    pub fn new(
        kind: AuthorityKind,
        params: &CloudParams,
        credential: &Credential,
        transport: &TransportConfig,
    ) -> Result<Self> {
        let root = api_root(&params.url).map_err(|e| Error::connector_init(kind, e))?;
        let (application, template_alias) =
            split_zone(&params.zone).map_err(|e| Error::connector_init(kind, e))?;

        let api_key = credential
            .api_key
            .clone()
            .filter(|key| !key.is_blank())
            .ok_or_else(|| Error::connector_init(kind, "credential has no API key"))?;

        let client = build_http_client(transport, credential.trust_bundle_pem.as_deref())?;

        Ok(Self {
            kind,
            client,
            root,
            application,
            template_alias,
            api_key,
            schedule: RetrievalSchedule {
                interval: transport.retrieval_poll_interval(),
                deadline: transport.retrieval_deadline(),
            },
            zone_ids: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> ConnectorResult<Url> {
        self.root
            .join(path)
            .map_err(|e| ConnectorError::InvalidRequest(format!("bad endpoint {}: {}", path, e)))
    }

    async fn check(&self, response: reqwest::Response) -> ConnectorResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = error_message(&response.text().await.unwrap_or_default());
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ConnectorError::AuthenticationRejected(message)
            }
            _ => ConnectorError::Upstream { status: status.as_u16(), message },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ConnectorResult<T> {
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn zone_ids(&self) -> ConnectorResult<&ZoneIds> {
        self.zone_ids
            .get_or_try_init(|| async {
                let mut app_url = self.endpoint("outagedetection/v1/applications/name/")?;
                app_url
                    .path_segments_mut()
                    .map_err(|_| ConnectorError::InvalidRequest("API URL cannot be a base".into()))?
                    .pop_if_empty()
                    .push(&self.application);
                let application: IdOnly = self.get_json(app_url.clone()).await?;

                let mut template_url = app_url;
                template_url
                    .path_segments_mut()
                    .map_err(|_| ConnectorError::InvalidRequest("API URL cannot be a base".into()))?
                    .push("certificateissuingtemplates")
                    .push(&self.template_alias);
                let template: IdOnly = self.get_json(template_url).await?;

                debug!(
                    application_id = %application.id,
                    template_id = %template.id,
                    "Resolved zone"
                );
                Ok(ZoneIds { application_id: application.id, template_id: template.id })
            })
            .instrument(crate::connector_span!(self.kind, "resolve_zone"))
            .await
    }

    async fn submit(&self, csr: &str) -> ConnectorResult<String> {
        let ids = self.zone_ids().await?;
        let response = self
            .client
            .post(self.endpoint("outagedetection/v1/certificaterequests")?)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&CertificateRequestBody {
                certificate_signing_request: csr,
                application_id: &ids.application_id,
                certificate_issuing_template_id: &ids.template_id,
            })
            .send()
            .await?;

        let envelope: CertificateRequestsEnvelope = self.check(response).await?.json().await?;
        let request = envelope.certificate_requests.into_iter().next().ok_or_else(|| {
            ConnectorError::InvalidResponse("no certificate request in response".into())
        })?;
        info!(authority = %self.kind, request_id = %request.id, "Certificate requested");
        Ok(request.id)
    }

    /// Poll the request until the certificate is issued, then fetch it.
    async fn retrieve(&self, request_id: &str) -> ConnectorResult<EnrollmentResponse> {
        let mut status_url = self.endpoint("outagedetection/v1/certificaterequests/")?;
        status_url
            .path_segments_mut()
            .map_err(|_| ConnectorError::InvalidRequest("API URL cannot be a base".into()))?
            .pop_if_empty()
            .push(request_id);

        let started = Instant::now();
        let certificate_id = loop {
            let status: CertificateRequestStatus = self.get_json(status_url.clone()).await?;
            match status.status.as_str() {
                "ISSUED" => {
                    break status.certificate_ids.into_iter().next().ok_or_else(|| {
                        ConnectorError::InvalidResponse("issued request has no certificate id".into())
                    })?
                }
                "FAILED" | "REJECTED" | "REJECTED_APPROVAL" | "CANCELLED" => {
                    let message = status
                        .error_information
                        .map(|info| error_message(&info.to_string()))
                        .unwrap_or_else(|| format!("request {}", status.status.to_lowercase()));
                    return Err(ConnectorError::Upstream { status: 200, message });
                }
                _ => {}
            }

            if started.elapsed() + self.schedule.interval > self.schedule.deadline {
                return Err(ConnectorError::Pending {
                    reference: request_id.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            debug!(request_id, status = %status.status, "Certificate pending, polling again");
            tokio::time::sleep(self.schedule.interval).await;
        };

        let mut contents_url = self.endpoint("outagedetection/v1/certificates/")?;
        contents_url
            .path_segments_mut()
            .map_err(|_| ConnectorError::InvalidRequest("API URL cannot be a base".into()))?
            .pop_if_empty()
            .push(&certificate_id)
            .push("contents");
        contents_url
            .query_pairs_mut()
            .append_pair("format", "PEM")
            .append_pair("chainOrder", "EE_FIRST");

        let response = self
            .client
            .get(contents_url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await?;
        let text = self.check(response).await?.text().await?;
        let (certificate, chain, _) = split_pem_bundle(&text)?;
        Ok(EnrollmentResponse { certificate, chain, private_key: None })
    }
}

#[async_trait]
impl Connector for CloudConnector {
    fn authority(&self) -> AuthorityKind {
        self.kind
    }

    #[instrument(skip_all, fields(authority = %self.kind, cn = %request.common_name))]
    async fn enroll(&self, request: &EnrollmentRequest) -> ConnectorResult<EnrollmentResponse> {
        let csr = request.csr.as_deref().ok_or_else(|| {
            ConnectorError::InvalidRequest("this authority only accepts CSR enrollments".into())
        })?;
        if !request.ip_addresses.is_empty() {
            let dropped: Vec<IpAddr> = request.ip_addresses.clone();
            warn!(?dropped, "IP SANs are not supported by this authority and were not requested");
        }
        let request_id = self.submit(csr).await?;
        self.retrieve(&request_id).await
    }

    #[instrument(skip_all, fields(authority = %self.kind))]
    async fn sign(&self, csr_pem: &str) -> ConnectorResult<EnrollmentResponse> {
        let request_id = self.submit(csr_pem).await?;
        self.retrieve(&request_id).await
    }

    async fn refresh_access_token(&self, _request: &RefreshRequest) -> ConnectorResult<TokenResponse> {
        Err(ConnectorError::Unsupported {
            authority: self.kind.to_string(),
            operation: "refresh_access_token",
        })
    }
}
