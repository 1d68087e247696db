//! Issuance and signing request types and the bundle returned to callers.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificates::{parse_csr, KeyType, ParsedCsr};
use crate::errors::{Error, Result};
use crate::secrets::{exposed, SecretString};

/// Raw issuance fields as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IssueFields {
    pub common_name: String,
    /// Comma-separated DNS names and email addresses
    pub alt_names: Option<String>,
    pub ip_sans: Vec<String>,
    #[serde(with = "exposed::option")]
    pub key_password: Option<SecretString>,
    pub organization: Option<String>,
    pub key_type: Option<KeyType>,
}

/// A parsed issuance request. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct IssuanceRequest {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
    pub organization: Option<String>,
    pub key_password: Option<SecretString>,
    /// Overrides the role's key type
    pub key_type: Option<KeyType>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

impl IssuanceRequest {
    /// Parse caller fields.
    ///
    /// `alt_names` entries containing `@` become email addresses; every other
    /// entry is a DNS name, including ones that look like IP addresses. IP
    /// SANs are only taken from `ip_sans`.
    pub fn from_fields(fields: IssueFields) -> Result<Self> {
        let common_name = fields.common_name.trim().to_string();
        if common_name.is_empty() {
            return Err(Error::invalid_request("common_name is required"));
        }

        let mut dns_names = Vec::new();
        let mut email_addresses = Vec::new();
        for entry in fields.alt_names.as_deref().unwrap_or_default().split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if entry.contains('@') {
                push_unique(&mut email_addresses, entry);
            } else {
                push_unique(&mut dns_names, entry);
            }
        }

        let mut ip_addresses: Vec<IpAddr> = Vec::with_capacity(fields.ip_sans.len());
        for raw in &fields.ip_sans {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let ip: IpAddr = raw
                .parse()
                .map_err(|_| Error::invalid_request(format!("'{}' is not a valid IP address", raw)))?;
            if !ip_addresses.contains(&ip) {
                ip_addresses.push(ip);
            }
        }

        Ok(Self {
            common_name,
            dns_names,
            ip_addresses,
            email_addresses,
            organization: fields
                .organization
                .map(|org| org.trim().to_string())
                .filter(|org| !org.is_empty()),
            key_password: fields.key_password.filter(|p| !p.is_empty()),
            key_type: fields.key_type,
        })
    }

    /// DNS names to place in a locally built CSR, common name first.
    pub fn csr_dns_names(&self) -> Vec<String> {
        let mut names = vec![self.common_name.clone()];
        for name in &self.dns_names {
            push_unique(&mut names, name);
        }
        names
    }
}

/// Raw signing fields as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignFields {
    pub csr: String,
    /// Key the CSR was made with, used only to check the returned certificate
    #[serde(with = "exposed::option")]
    pub private_key: Option<SecretString>,
}

/// A verified caller CSR.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub csr: ParsedCsr,
    pub private_key: Option<SecretString>,
}

impl SigningRequest {
    pub fn from_fields(fields: SignFields) -> Result<Self> {
        if fields.csr.trim().is_empty() {
            return Err(Error::invalid_request("csr is required"));
        }
        Ok(Self {
            csr: parse_csr(&fields.csr)?,
            private_key: fields.private_key.filter(|key| !key.is_blank()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Normalized certificate serial
    pub lease_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Issued material. Ownership passes to the caller.
#[derive(Debug, Clone, Default)]
pub struct CertificateBundle {
    pub certificate: String,
    pub chain: Vec<String>,
    /// Absent for signing
    pub private_key: Option<SecretString>,
    pub private_key_encrypted: bool,
    /// SHA-256 of the CSR public key, hex encoded; signing only
    pub csr_key_id: Option<String>,
    pub serial_number: String,
    pub lease: Option<Lease>,
}

/// Response shape handed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct IssueResponse {
    pub certificate: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    #[serde(with = "exposed::option", skip_serializing_if = "Option::is_none")]
    pub private_key: Option<SecretString>,
    pub serial_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csr_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
}

impl From<CertificateBundle> for IssueResponse {
    fn from(bundle: CertificateBundle) -> Self {
        Self {
            certificate: bundle.certificate,
            chain: bundle.chain,
            private_key: bundle.private_key,
            serial_number: bundle.serial_number,
            csr_key_id: bundle.csr_key_id,
            lease: bundle.lease,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_names_are_split_by_kind() {
        let request = IssuanceRequest::from_fields(IssueFields {
            common_name: "alpha.example.com".into(),
            alt_names: Some("alt-alpha.example.com,user@example.com, 10.0.0.5".into()),
            ip_sans: vec!["127.0.0.1".into()],
            ..Default::default()
        })
        .unwrap();

        assert_eq!(request.dns_names, vec!["alt-alpha.example.com", "10.0.0.5"]);
        assert_eq!(request.email_addresses, vec!["user@example.com"]);
        assert_eq!(request.ip_addresses, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(
            request.csr_dns_names(),
            vec!["alpha.example.com", "alt-alpha.example.com", "10.0.0.5"]
        );
    }

    #[test]
    fn rejects_missing_common_name_and_bad_ip() {
        assert!(IssuanceRequest::from_fields(IssueFields::default()).is_err());

        let err = IssuanceRequest::from_fields(IssueFields {
            common_name: "a.example.com".into(),
            ip_sans: vec!["10.0.0.300".into()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn empty_passphrase_means_clear_key() {
        let request = IssuanceRequest::from_fields(IssueFields {
            common_name: "a.example.com".into(),
            key_password: Some(SecretString::new("")),
            ..Default::default()
        })
        .unwrap();
        assert!(request.key_password.is_none());
    }

    #[test]
    fn fields_deserialize_from_json() {
        let fields: IssueFields = serde_json::from_str(
            r#"{"common_name":"a.example.com","ip_sans":["::1"],"key_password":"pw","key_type":"ecdsa_p256"}"#,
        )
        .unwrap();
        assert_eq!(fields.key_password.unwrap().expose_secret(), "pw");
        assert_eq!(fields.key_type, Some(KeyType::EcdsaP256));
    }

    #[test]
    fn empty_csr_is_rejected() {
        assert!(SigningRequest::from_fields(SignFields::default()).is_err());
    }
}
