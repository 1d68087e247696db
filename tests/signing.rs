//! CSR signing against the cloud authority (mocked) and the fake authority.

mod common;

use std::sync::Arc;

use certbroker::certificates::{
    build_csr, generate_key, parse_certificate_pem, private_key_pem, CsrSubject, KeyType,
};
use certbroker::issuance::{IssuanceService, SignFields, SigningRequest};
use certbroker::roles::RoleRequest;
use certbroker::secrets::SecretString;
use certbroker::{Error, ErrorCategory};
use common::CsrSigner;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct RecordCsr(Arc<CsrSigner>);

impl Respond for RecordCsr {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = request.body_json().unwrap();
        self.0.record(body["certificateSigningRequest"].as_str().unwrap().to_string());
        ResponseTemplate::new(201)
            .set_body_json(json!({"certificateRequests": [{"id": "req-1", "status": "REQUESTED"}]}))
    }
}

struct IssueContents(Arc<CsrSigner>);

impl Respond for IssueContents {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(self.0.issue())
    }
}

async fn mount_cloud(server: &MockServer, signer: Arc<CsrSigner>) {
    Mock::given(method("GET"))
        .and(path("/outagedetection/v1/applications/name/Web"))
        .and(header("tppl-api-key", "cloud-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "app-1"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/outagedetection/v1/applications/name/Web/certificateissuingtemplates/Default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "tpl-1"})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/outagedetection/v1/certificaterequests"))
        .respond_with(RecordCsr(signer.clone()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/outagedetection/v1/certificaterequests/req-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"id": "req-1", "status": "ISSUED", "certificateIds": ["cert-1"]}),
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/outagedetection/v1/certificates/cert-1/contents"))
        .respond_with(IssueContents(signer))
        .mount(server)
        .await;
}

async fn cloud_service(server: &MockServer) -> IssuanceService {
    let registry = common::memory_registry();
    registry
        .write_role(
            "cloud",
            RoleRequest {
                cloud_url: Some(server.uri()),
                apikey: Some(SecretString::new("cloud-key")),
                zone: Some("Web\\Default".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    IssuanceService::with_default_connectors(Arc::new(common::test_config()), registry)
}

fn beta_csr() -> (String, SecretString) {
    let key = generate_key(KeyType::EcdsaP256).unwrap();
    let csr = build_csr(
        &CsrSubject { common_name: "beta.example.com".into(), ..Default::default() },
        &key,
    )
    .unwrap();
    (csr, private_key_pem(&key))
}

#[tokio::test]
async fn cloud_sign_validates_against_caller_key() {
    let server = MockServer::start().await;
    let signer = CsrSigner::new();
    mount_cloud(&server, signer.clone()).await;
    let service = cloud_service(&server).await;

    let (csr, key) = beta_csr();
    let request = SigningRequest::from_fields(SignFields { csr: csr.clone(), private_key: Some(key) })
        .unwrap();
    let bundle = service.sign("cloud", &request).await.unwrap();

    assert!(bundle.private_key.is_none());
    assert!(bundle.csr_key_id.as_ref().is_some_and(|id| id.len() == 64));
    assert_eq!(signer.submitted().as_deref(), Some(csr.as_str()));

    let cert = parse_certificate_pem(&bundle.certificate).unwrap();
    assert_eq!(cert.subject.common_name.as_deref(), Some("beta.example.com"));
    assert!(cert.subject.ip_addresses.is_empty());
    assert_eq!(bundle.chain.len(), 1);
}

#[tokio::test]
async fn cloud_rejects_bad_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"errors": [{"message": "Invalid api key"}]})),
        )
        .mount(&server)
        .await;
    let service = cloud_service(&server).await;

    let (csr, _) = beta_csr();
    let request = SigningRequest::from_fields(SignFields { csr, private_key: None }).unwrap();
    let err = service.sign("cloud", &request).await.unwrap_err();

    assert!(matches!(err, Error::SigningFailed { .. }));
    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert!(err.to_string().contains("Invalid api key"));
}

#[tokio::test]
async fn wrong_private_key_is_reported() {
    let service = common::fake_service("dev", false).await;
    let (csr, _) = beta_csr();
    let other = private_key_pem(&generate_key(KeyType::EcdsaP256).unwrap());

    let request = SigningRequest::from_fields(SignFields { csr, private_key: Some(other) }).unwrap();
    let err = service.sign("dev", &request).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert_eq!(
        err.mismatched_field(),
        Some(certbroker::errors::ValidationField::KeyPair)
    );
}

#[tokio::test]
async fn fake_sign_adds_common_name() {
    let service = common::fake_service("dev", false).await;
    let key = generate_key(KeyType::EcdsaP256).unwrap();
    let csr = build_csr(
        &CsrSubject {
            common_name: "gamma.example.com".into(),
            dns_names: vec!["www.gamma.example.com".into()],
            ..Default::default()
        },
        &key,
    )
    .unwrap();

    let request = SigningRequest::from_fields(SignFields {
        csr,
        private_key: Some(private_key_pem(&key)),
    })
    .unwrap();
    let bundle = service.sign("dev", &request).await.unwrap();
    let cert = parse_certificate_pem(&bundle.certificate).unwrap();
    assert!(cert.subject.dns_names.contains(&"gamma.example.com".to_string()));
}

#[tokio::test]
async fn garbage_csr_is_request_error() {
    let err = SigningRequest::from_fields(SignFields {
        csr: "-----BEGIN CERTIFICATE REQUEST-----\nAAAA\n-----END CERTIFICATE REQUEST-----\n".into(),
        private_key: None,
    })
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Request);
}
