//! Certificate signing request construction and parsing.

use std::net::IpAddr;

use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::*;

use super::parse::{collect_general_names, names_from, PublicKeyInfo, SubjectNames};
use crate::errors::{Error, Result};

/// Identity placed in a locally built CSR.
#[derive(Debug, Clone, Default)]
pub struct CsrSubject {
    pub common_name: String,
    pub organization: Option<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
}

/// Build a PEM CSR for `subject`, signed by `key_pair`.
///
/// SAN entries are typed explicitly, so a DNS name that looks like an IP
/// address stays a DNS name.
pub fn build_csr(subject: &CsrSubject, key_pair: &KeyPair) -> Result<String> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject.common_name.as_str());
    if let Some(org) = &subject.organization {
        dn.push(DnType::OrganizationName, org.as_str());
    }
    params.distinguished_name = dn;

    for dns in &subject.dns_names {
        params.subject_alt_names.push(SanType::DnsName(ia5(dns)?));
    }
    for ip in &subject.ip_addresses {
        params.subject_alt_names.push(SanType::IpAddress(*ip));
    }
    for email in &subject.email_addresses {
        params.subject_alt_names.push(SanType::Rfc822Name(ia5(email)?));
    }

    params
        .serialize_request(key_pair)
        .and_then(|csr| csr.pem())
        .map_err(|e| Error::key_material(format!("failed to build CSR: {}", e)))
}

fn ia5(value: &str) -> Result<Ia5String> {
    Ia5String::try_from(value)
        .map_err(|_| Error::invalid_request(format!("'{}' is not a valid IA5 name", value)))
}

/// A caller-supplied CSR after decoding and signature verification.
#[derive(Debug, Clone)]
pub struct ParsedCsr {
    pub pem: String,
    pub subject: SubjectNames,
    pub public_key: PublicKeyInfo,
}

/// Decode a PEM `CERTIFICATE REQUEST` and verify its self-signature.
///
/// # Errors
///
/// [`Error::InvalidRequest`] for anything that is not a well-formed, validly
/// signed request.
pub fn parse_csr(pem: &str) -> Result<ParsedCsr> {
    let block = ::pem::parse(pem.trim())
        .map_err(|e| Error::invalid_request(format!("CSR is not valid PEM: {}", e)))?;
    if !matches!(block.tag(), "CERTIFICATE REQUEST" | "NEW CERTIFICATE REQUEST") {
        return Err(Error::invalid_request(format!(
            "expected a CERTIFICATE REQUEST block, found '{}'",
            block.tag()
        )));
    }

    let (_, csr) = X509CertificationRequest::from_der(block.contents())
        .map_err(|e| Error::invalid_request(format!("CSR could not be decoded: {}", e)))?;
    csr.verify_signature()
        .map_err(|e| Error::invalid_request(format!("CSR signature is invalid: {}", e)))?;

    let info = &csr.certification_request_info;
    let mut subject = names_from(&info.subject);
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                collect_general_names(&san.general_names, &mut subject)
                    .map_err(|e| Error::invalid_request(format!("CSR {}", e)))?;
            }
        }
    }

    Ok(ParsedCsr {
        pem: pem.to_string(),
        subject,
        public_key: PublicKeyInfo::from_spki(&info.subject_pki),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::keys::{generate_key, KeyType};

    #[test]
    fn ip_looking_dns_name_stays_dns() {
        let key = generate_key(KeyType::EcdsaP256).unwrap();
        let subject = CsrSubject {
            common_name: "alpha.example.com".into(),
            organization: Some("Example Org".into()),
            dns_names: vec!["alpha.example.com".into(), "10.0.0.5".into()],
            ip_addresses: vec!["127.0.0.1".parse().unwrap()],
            email_addresses: vec!["user@example.com".into()],
        };

        let parsed = parse_csr(&build_csr(&subject, &key).unwrap()).unwrap();
        assert_eq!(parsed.subject.common_name.as_deref(), Some("alpha.example.com"));
        assert_eq!(parsed.subject.organizations, vec!["Example Org"]);
        assert_eq!(parsed.subject.dns_names, vec!["alpha.example.com", "10.0.0.5"]);
        assert_eq!(parsed.subject.ip_addresses, vec!["127.0.0.1"]);
        assert_eq!(parsed.subject.email_addresses, vec!["user@example.com"]);
        assert_eq!(parsed.public_key.spki_der, key.public_key_der());
    }

    #[test]
    fn certificate_is_not_a_csr() {
        let key = generate_key(KeyType::EcdsaP256).unwrap();
        let cert = rcgen::CertificateParams::new(vec!["a.example.com".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        assert!(matches!(parse_csr(&cert.pem()), Err(Error::InvalidRequest { .. })));
    }

    #[test]
    fn non_ascii_name_rejected() {
        let key = generate_key(KeyType::EcdsaP256).unwrap();
        let subject = CsrSubject {
            common_name: "x".into(),
            dns_names: vec!["bücher.example".into()],
            ..Default::default()
        };
        assert!(matches!(build_csr(&subject, &key), Err(Error::InvalidRequest { .. })));
    }
}
