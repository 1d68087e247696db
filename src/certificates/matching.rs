//! Private/public key pairing checks.

use anyhow::anyhow;
use ring::{
    rand::SystemRandom,
    signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
        ECDSA_P384_SHA384_ASN1_SIGNING,
    },
};
use rustls::pki_types::{pem::PemObject, PrivateKeyDer};
use simple_asn1::{ASN1Block, BigInt};

use super::parse::PublicKeyInfo;
use crate::errors::{Error, Result, ValidationField};

const OID_ED25519: &str = "1.3.101.112";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

/// Check that `private_key_pem` (unencrypted PKCS#8, PKCS#1 RSA) is the
/// private half of `public_key`.
///
/// # Errors
///
/// [`Error::ValidationMismatch`] on [`ValidationField::KeyPair`] when the
/// halves differ, [`Error::KeyMaterial`] when the private key cannot be read.
pub fn ensure_key_pair(public_key: &PublicKeyInfo, private_key_pem: &str) -> Result<()> {
    let private_key = PrivateKeyDer::from_pem_slice(private_key_pem.as_bytes())
        .map_err(|e| Error::key_material(format!("unreadable private key: {:?}", e)))?;
    let key_bytes = private_key.secret_der();

    let derived = match public_key.algorithm_oid.as_str() {
        OID_ED25519 => Ed25519KeyPair::from_pkcs8_maybe_unchecked(key_bytes)
            .map(|pair| pair.public_key().as_ref().to_vec())
            .map_err(|_| mismatch(public_key, "an Ed25519 key that does not load"))?,
        OID_EC_PUBLIC_KEY => ec_public_key(key_bytes)
            .ok_or_else(|| mismatch(public_key, "a private key that is not a P-256/P-384 PKCS#8 key"))?,
        OID_RSA_ENCRYPTION => {
            let pair = RsaKeyPair::from_pkcs8(key_bytes)
                .or_else(|_| RsaKeyPair::from_der(key_bytes))
                .map_err(|_| mismatch(public_key, "a private key that is not an RSA key"))?;
            return compare_rsa_public_key(&pair, &public_key.key)
                .map_err(|e| mismatch(public_key, e.to_string()));
        }
        other => {
            return Err(Error::key_material(format!(
                "unsupported public key algorithm {}",
                other
            )))
        }
    };

    if derived == public_key.key {
        Ok(())
    } else {
        Err(mismatch(public_key, "a private key for a different public key"))
    }
}

fn mismatch(public_key: &PublicKeyInfo, actual: impl Into<String>) -> Error {
    Error::mismatch(
        ValidationField::KeyPair,
        format!("private key for {} public key", public_key.algorithm_oid),
        actual,
    )
}

fn ec_public_key(key_bytes: &[u8]) -> Option<Vec<u8>> {
    let rng = SystemRandom::new();
    [&ECDSA_P256_SHA256_ASN1_SIGNING, &ECDSA_P384_SHA384_ASN1_SIGNING]
        .into_iter()
        .find_map(|alg| EcdsaKeyPair::from_pkcs8(alg, key_bytes, &rng).ok())
        .map(|pair| pair.public_key().as_ref().to_vec())
}

fn compare_rsa_public_key(key_pair: &RsaKeyPair, public_key: &[u8]) -> anyhow::Result<()> {
    let (subject_modulus, subject_exponent) = rsa_components(public_key)?;
    let (key_modulus, key_exponent) = rsa_components(key_pair.public().as_ref())?;

    if subject_modulus == key_modulus && subject_exponent == key_exponent {
        Ok(())
    } else {
        Err(anyhow!("an RSA private key with a different modulus"))
    }
}

/// Modulus and exponent of a DER `RSAPublicKey`.
fn rsa_components(der: &[u8]) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
    let blocks = simple_asn1::from_der(der)?;
    let seq = match blocks.first() {
        Some(ASN1Block::Sequence(_, items)) if items.len() >= 2 => items,
        _ => return Err(anyhow!("an RSA public key without modulus and exponent")),
    };

    match (&seq[0], &seq[1]) {
        (ASN1Block::Integer(_, modulus), ASN1Block::Integer(_, exponent)) => {
            Ok((bigint_to_bytes(modulus), bigint_to_bytes(exponent)))
        }
        _ => Err(anyhow!("an RSA public key with non-integer components")),
    }
}

fn bigint_to_bytes(value: &BigInt) -> Vec<u8> {
    value.to_biguint().map_or_else(Vec::new, |v| v.to_bytes_be())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::keys::{generate_key, KeyType};
    use crate::certificates::parse::parse_certificate_pem;

    fn certificate_for(key: &rcgen::KeyPair) -> PublicKeyInfo {
        let cert = rcgen::CertificateParams::new(vec!["k.example.com".to_string()])
            .unwrap()
            .self_signed(key)
            .unwrap();
        parse_certificate_pem(&cert.pem()).unwrap().public_key
    }

    #[test]
    fn matching_ec_keys_pair() {
        for key_type in [KeyType::EcdsaP256, KeyType::EcdsaP384] {
            let key = generate_key(key_type).unwrap();
            ensure_key_pair(&certificate_for(&key), &key.serialize_pem()).unwrap();
        }
    }

    #[test]
    fn matching_rsa_key_pairs() {
        let key = generate_key(KeyType::Rsa2048).unwrap();
        ensure_key_pair(&certificate_for(&key), &key.serialize_pem()).unwrap();
    }

    #[test]
    fn foreign_key_is_mismatch() {
        let key = generate_key(KeyType::EcdsaP256).unwrap();
        let other = generate_key(KeyType::EcdsaP256).unwrap();
        let err = ensure_key_pair(&certificate_for(&key), &other.serialize_pem()).unwrap_err();
        assert_eq!(err.mismatched_field(), Some(ValidationField::KeyPair));
    }

    #[test]
    fn foreign_rsa_key_is_mismatch() {
        let key = generate_key(KeyType::Rsa2048).unwrap();
        let other = generate_key(KeyType::Rsa2048).unwrap();
        let err = ensure_key_pair(&certificate_for(&key), &other.serialize_pem()).unwrap_err();
        assert_eq!(err.mismatched_field(), Some(ValidationField::KeyPair));
    }

    #[test]
    fn algorithm_family_mismatch() {
        let key = generate_key(KeyType::EcdsaP256).unwrap();
        let rsa = generate_key(KeyType::Rsa2048).unwrap();
        let err = ensure_key_pair(&certificate_for(&key), &rsa.serialize_pem()).unwrap_err();
        assert_eq!(err.mismatched_field(), Some(ValidationField::KeyPair));
    }
}
