//! Checks that a returned certificate carries exactly what was requested.
//!
//! Every check is a pure function over the parsed certificate and the
//! expectation, so each can be exercised on its own. The entry points run
//! them in a fixed order and report the first mismatch.

use std::collections::BTreeSet;
use std::net::IpAddr;

use super::csr::ParsedCsr;
use super::keys::{decrypt_private_key, is_encrypted_key};
use super::matching::ensure_key_pair;
use super::parse::{canonical_ip, parse_certificate_pem, ParsedCertificate};
use crate::errors::{Error, Result, ValidationField};
use crate::issuance::{CertificateBundle, IssuanceRequest, SigningRequest};

/// Authority-dependent knobs for validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationPolicy {
    /// When false the IP SAN check is skipped entirely
    pub ip_sans_supported: bool,
    /// Issuer common name the certificate must carry, when configured
    pub expected_issuer: Option<String>,
}

/// The identity a certificate must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedIdentity {
    pub common_name: Option<String>,
    /// Requested DNS names plus the common name
    pub dns_names: BTreeSet<String>,
    /// `None` when the authority cannot place IP SANs
    pub ip_addresses: Option<BTreeSet<String>>,
    pub email_addresses: BTreeSet<String>,
    pub organization: Option<String>,
}

impl ExpectedIdentity {
    pub fn for_issuance(request: &IssuanceRequest, ip_sans_supported: bool) -> Self {
        let mut dns_names: BTreeSet<String> = request.dns_names.iter().cloned().collect();
        dns_names.insert(request.common_name.clone());

        Self {
            common_name: Some(request.common_name.clone()),
            dns_names,
            ip_addresses: ip_sans_supported
                .then(|| request.ip_addresses.iter().map(|ip| canonical_ip_string(*ip)).collect()),
            email_addresses: request.email_addresses.iter().cloned().collect(),
            organization: request.organization.clone(),
        }
    }

    pub fn for_signing(csr: &ParsedCsr, ip_sans_supported: bool) -> Self {
        let subject = &csr.subject;
        let mut dns_names: BTreeSet<String> = subject.dns_names.iter().cloned().collect();
        if let Some(cn) = &subject.common_name {
            dns_names.insert(cn.clone());
        }

        Self {
            common_name: subject.common_name.clone(),
            dns_names,
            ip_addresses: ip_sans_supported
                .then(|| subject.ip_addresses.iter().cloned().collect()),
            email_addresses: subject.email_addresses.iter().cloned().collect(),
            organization: subject.organizations.first().cloned(),
        }
    }
}

/// Canonical text of an address; IPv4-mapped IPv6 renders as IPv4.
pub fn canonical_ip_string(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => canonical_ip(&v6.octets()).unwrap_or_else(|| v6.to_string()),
    }
}

fn describe(values: &BTreeSet<String>) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn check_set(field: ValidationField, actual: &[String], expected: &BTreeSet<String>) -> Result<()> {
    let actual: BTreeSet<String> = actual.iter().cloned().collect();
    if &actual == expected {
        Ok(())
    } else {
        Err(Error::mismatch(field, describe(expected), describe(&actual)))
    }
}

pub fn check_common_name(cert: &ParsedCertificate, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match cert.subject.common_name.as_deref() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(Error::mismatch(
            ValidationField::CommonName,
            expected,
            actual.unwrap_or("(none)"),
        )),
    }
}

/// Exact, case-sensitive, order-independent comparison.
pub fn check_dns_names(cert: &ParsedCertificate, expected: &BTreeSet<String>) -> Result<()> {
    check_set(ValidationField::DnsNames, &cert.subject.dns_names, expected)
}

/// `expected` must already be in canonical form (see [`canonical_ip_string`]).
pub fn check_ip_addresses(cert: &ParsedCertificate, expected: &BTreeSet<String>) -> Result<()> {
    check_set(ValidationField::IpAddresses, &cert.subject.ip_addresses, expected)
}

pub fn check_email_addresses(cert: &ParsedCertificate, expected: &BTreeSet<String>) -> Result<()> {
    check_set(ValidationField::EmailAddresses, &cert.subject.email_addresses, expected)
}

/// Compares the first organization only. A requested organization that is
/// absent from the certificate is a mismatch.
pub fn check_organization(cert: &ParsedCertificate, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match cert.subject.organizations.first() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(Error::mismatch(
            ValidationField::Organization,
            expected,
            actual.map(String::as_str).unwrap_or("(none)"),
        )),
    }
}

pub fn check_issuer(cert: &ParsedCertificate, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match cert.issuer_common_name.as_deref() {
        Some(actual) if actual == expected => Ok(()),
        actual => {
            Err(Error::mismatch(ValidationField::Issuer, expected, actual.unwrap_or("(none)")))
        }
    }
}

/// The unencrypted private key must pair with the certificate.
pub fn check_key_pair(cert: &ParsedCertificate, private_key_pem: &str) -> Result<()> {
    ensure_key_pair(&cert.public_key, private_key_pem)
}

/// A signed certificate must carry the CSR's public key.
pub fn check_csr_public_key(cert: &ParsedCertificate, csr: &ParsedCsr) -> Result<()> {
    if cert.public_key.spki_der == csr.public_key.spki_der {
        Ok(())
    } else {
        Err(Error::mismatch(
            ValidationField::KeyPair,
            "certificate for the CSR public key",
            "certificate for a different public key",
        ))
    }
}

fn check_identity(
    cert: &ParsedCertificate,
    expected: &ExpectedIdentity,
    policy: &ValidationPolicy,
) -> Result<()> {
    check_common_name(cert, expected.common_name.as_deref())?;
    check_dns_names(cert, &expected.dns_names)?;
    if let Some(ips) = &expected.ip_addresses {
        check_ip_addresses(cert, ips)?;
    }
    check_email_addresses(cert, &expected.email_addresses)?;
    check_organization(cert, expected.organization.as_deref())?;
    check_issuer(cert, policy.expected_issuer.as_deref())
}

/// Validate an issued bundle, decrypting its key with the request's
/// passphrase when it is protected.
pub fn validate_issued(
    bundle: &CertificateBundle,
    request: &IssuanceRequest,
    policy: &ValidationPolicy,
) -> Result<ParsedCertificate> {
    let cert = parse_certificate_pem(&bundle.certificate)?;
    let expected = ExpectedIdentity::for_issuance(request, policy.ip_sans_supported);
    check_identity(&cert, &expected, policy)?;

    let private_key = bundle.private_key.as_ref().ok_or_else(|| {
        Error::mismatch(ValidationField::KeyPair, "private key in bundle", "(none)")
    })?;

    if is_encrypted_key(private_key.expose_secret()) {
        let passphrase = request.key_password.as_ref().ok_or_else(|| {
            Error::key_material("private key is encrypted but no passphrase was supplied")
        })?;
        let clear = decrypt_private_key(private_key.expose_secret(), passphrase.expose_secret())?;
        check_key_pair(&cert, clear.expose_secret())?;
    } else {
        check_key_pair(&cert, private_key.expose_secret())?;
    }

    Ok(cert)
}

/// Validate a signed certificate against the CSR it was requested with.
pub fn validate_signed(
    bundle: &CertificateBundle,
    request: &SigningRequest,
    policy: &ValidationPolicy,
) -> Result<ParsedCertificate> {
    let cert = parse_certificate_pem(&bundle.certificate)?;
    let expected = ExpectedIdentity::for_signing(&request.csr, policy.ip_sans_supported);
    check_identity(&cert, &expected, policy)?;
    check_csr_public_key(&cert, &request.csr)?;

    if let Some(private_key) = &request.private_key {
        check_key_pair(&cert, private_key.expose_secret())?;
    }

    Ok(cert)
}
