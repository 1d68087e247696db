//! Decoding of returned certificates and PEM bundles.

use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, TimeZone, Utc};
use x509_parser::prelude::*;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::errors::{Error, Result};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Subject identity carried by a certificate or certificate request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectNames {
    pub common_name: Option<String>,
    pub organizations: Vec<String>,
    pub dns_names: Vec<String>,
    /// Canonical string form; IPv4-mapped IPv6 addresses render as IPv4
    pub ip_addresses: Vec<String>,
    pub email_addresses: Vec<String>,
}

/// Public key as found in a SubjectPublicKeyInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyInfo {
    pub algorithm_oid: String,
    /// Contents of the subjectPublicKey bit string
    pub key: Vec<u8>,
    /// DER of the whole SubjectPublicKeyInfo
    pub spki_der: Vec<u8>,
}

impl PublicKeyInfo {
    pub(crate) fn from_spki(spki: &SubjectPublicKeyInfo<'_>) -> Self {
        Self {
            algorithm_oid: spki.algorithm.algorithm.to_id_string(),
            key: spki.subject_public_key.data.to_vec(),
            spki_der: spki.raw.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    pub subject: SubjectNames,
    pub issuer_common_name: Option<String>,
    /// Colon-separated lowercase hex
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_key: PublicKeyInfo,
}

/// Parse the first `CERTIFICATE` block of `pem`.
///
/// # Errors
///
/// [`Error::MalformedCertificate`] when there is no certificate block or the
/// DER payload does not decode.
pub fn parse_certificate_pem(pem: &str) -> Result<ParsedCertificate> {
    let blocks = ::pem::parse_many(pem)
        .map_err(|e| Error::malformed(format!("invalid PEM: {}", e)))?;
    let block = blocks
        .into_iter()
        .find(|block| block.tag() == CERTIFICATE_TAG)
        .ok_or_else(|| Error::malformed("no CERTIFICATE block found"))?;
    parse_certificate_der(block.contents())
}

pub fn parse_certificate_der(der: &[u8]) -> Result<ParsedCertificate> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::malformed(format!("invalid certificate DER: {}", e)))?;

    let mut subject = names_from(cert.subject());
    let san = cert
        .subject_alternative_name()
        .map_err(|e| Error::malformed(format!("invalid subjectAltName extension: {}", e)))?;
    if let Some(san) = san {
        collect_general_names(&san.value.general_names, &mut subject)?;
    }

    let validity = cert.validity();
    Ok(ParsedCertificate {
        subject,
        issuer_common_name: first_common_name(cert.issuer()),
        serial_number: format_serial(cert.raw_serial()),
        not_before: to_chrono(&validity.not_before)?,
        not_after: to_chrono(&validity.not_after)?,
        public_key: PublicKeyInfo::from_spki(cert.public_key()),
    })
}

pub(crate) fn names_from(name: &X509Name<'_>) -> SubjectNames {
    SubjectNames {
        common_name: first_common_name(name),
        organizations: name
            .iter_organization()
            .filter_map(|attr| attr.as_str().ok().map(str::to_string))
            .collect(),
        ..Default::default()
    }
}

fn first_common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name().next().and_then(|cn| cn.as_str().ok()).map(str::to_string)
}

pub(crate) fn collect_general_names(
    general_names: &[GeneralName<'_>],
    names: &mut SubjectNames,
) -> Result<()> {
    for general_name in general_names {
        match general_name {
            GeneralName::DNSName(dns) => names.dns_names.push(dns.to_string()),
            GeneralName::RFC822Name(email) => names.email_addresses.push(email.to_string()),
            GeneralName::IPAddress(bytes) => {
                let ip = canonical_ip(bytes).ok_or_else(|| {
                    Error::malformed(format!("IP address SAN of {} bytes", bytes.len()))
                })?;
                names.ip_addresses.push(ip);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Canonical string form of a raw 4- or 16-byte address.
pub fn canonical_ip(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(Ipv4Addr::from(octets).to_string())
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            let v6 = Ipv6Addr::from(octets);
            Some(match v6.to_ipv4_mapped() {
                Some(v4) => v4.to_string(),
                None => v6.to_string(),
            })
        }
        _ => None,
    }
}

fn to_chrono(time: &ASN1Time) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .ok_or_else(|| Error::malformed("certificate validity out of range"))
}

/// Split a PEM bundle into its certificate blocks, re-encoded one per entry.
pub fn certificate_blocks(pem: &str) -> Result<Vec<String>> {
    let blocks = ::pem::parse_many(pem)
        .map_err(|e| Error::malformed(format!("invalid PEM: {}", e)))?;
    let config = ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF);
    Ok(blocks
        .iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(|block| ::pem::encode_config(block, config))
        .collect())
}

/// Colon-separated lowercase hex, e.g. `0a:1b:2c`.
pub fn format_serial(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

/// Lowercase with `:` replaced by `-`, the form used in lease identifiers.
pub fn normalize_serial(serial: &str) -> String {
    serial.to_lowercase().replace(':', "-")
}
