use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use tracing::warn;

use crate::errors::{Error, Result, TlsError};

/// Parse a PEM bundle of CA certificates into a verification pool.
///
/// Certificates the pool refuses are skipped as long as at least one is
/// accepted.
///
/// # Errors
///
/// [`Error::InvalidTrustBundle`] when the input is blank, a PEM section is
/// malformed, or no certificate ends up in the pool.
pub fn load_trust_bundle(pem: &str) -> Result<RootCertStore> {
    if pem.trim().is_empty() {
        return Err(Error::InvalidTrustBundle(TlsError::EmptyTrustBundle));
    }

    let mut roots = RootCertStore::empty();
    let mut first_rejection = None;

    for (index, cert) in CertificateDer::pem_slice_iter(pem.as_bytes()).enumerate() {
        let cert = cert.map_err(|e| {
            Error::InvalidTrustBundle(TlsError::InvalidPem {
                source: anyhow::anyhow!("{:?}", e),
            })
        })?;

        if let Err(source) = roots.add(cert) {
            warn!(index, error = %source, "Skipping certificate rejected from trust bundle");
            first_rejection.get_or_insert(TlsError::RejectedCertificate { index, source });
        }
    }

    if roots.is_empty() {
        return Err(Error::InvalidTrustBundle(
            first_rejection.unwrap_or(TlsError::NoCertificates),
        ));
    }

    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ca_pem(cn: &str) -> String {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.distinguished_name.push(rcgen::DnType::CommonName, cn);
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn empty_bundle_is_rejected() {
        for input in ["", "   \n"] {
            let err = load_trust_bundle(input).unwrap_err();
            assert!(matches!(err, Error::InvalidTrustBundle(TlsError::EmptyTrustBundle)));
        }
    }

    #[test]
    fn text_without_certificates_is_rejected() {
        let err = load_trust_bundle("just some text\n").unwrap_err();
        assert!(matches!(err, Error::InvalidTrustBundle(TlsError::NoCertificates)));
    }

    #[test]
    fn private_key_only_is_rejected() {
        let key = rcgen::KeyPair::generate().unwrap();
        let err = load_trust_bundle(&key.serialize_pem()).unwrap_err();
        assert!(matches!(err, Error::InvalidTrustBundle(TlsError::NoCertificates)));
    }

    #[test]
    fn multi_certificate_bundle_loads() {
        let bundle = format!("{}{}", ca_pem("Root A"), ca_pem("Root B"));
        let roots = load_trust_bundle(&bundle).unwrap();
        assert_eq!(roots.len(), 2);
    }
}
