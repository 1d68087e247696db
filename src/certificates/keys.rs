//! Key generation and PKCS#8 passphrase protection.

use std::fmt;
use std::str::FromStr;

use pkcs8::der::pem::LineEnding;
use pkcs8::pkcs5::pbes2;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo, SecretDocument};
use rand::RngCore;
use rcgen::KeyPair;
use rsa::pkcs8::EncodePrivateKey;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::secrets::SecretString;

const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";
const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";
const RSA_PRIVATE_KEY_LABEL: &str = "RSA PRIVATE KEY";
const PBKDF2_ITERATIONS: u32 = 10_000;

/// Key algorithm for locally generated key pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    #[default]
    Rsa2048,
    Rsa4096,
    EcdsaP256,
    EcdsaP384,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Rsa2048 => "rsa2048",
            KeyType::Rsa4096 => "rsa4096",
            KeyType::EcdsaP256 => "ecdsa_p256",
            KeyType::EcdsaP384 => "ecdsa_p384",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "rsa" | "rsa2048" | "rsa_2048" => Ok(KeyType::Rsa2048),
            "rsa4096" | "rsa_4096" => Ok(KeyType::Rsa4096),
            "ec" | "ecdsa" | "ecdsa_p256" | "p256" => Ok(KeyType::EcdsaP256),
            "ecdsa_p384" | "p384" => Ok(KeyType::EcdsaP384),
            other => Err(Error::invalid_request(format!("unsupported key type '{}'", other))),
        }
    }
}

/// Generate a fresh key pair usable for CSR signing.
pub fn generate_key(key_type: KeyType) -> Result<KeyPair> {
    match key_type {
        KeyType::Rsa2048 => generate_rsa(2048),
        KeyType::Rsa4096 => generate_rsa(4096),
        KeyType::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::key_material(format!("EC key generation failed: {}", e))),
        KeyType::EcdsaP384 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
            .map_err(|e| Error::key_material(format!("EC key generation failed: {}", e))),
    }
}

// ring can sign with RSA keys but not create them.
fn generate_rsa(bits: usize) -> Result<KeyPair> {
    let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|e| Error::key_material(format!("RSA key generation failed: {}", e)))?;
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| Error::key_material(format!("RSA key encoding failed: {}", e)))?;
    KeyPair::from_pem(&pem)
        .map_err(|e| Error::key_material(format!("RSA key could not be loaded: {}", e)))
}

/// Unencrypted PKCS#8 PEM of a key pair.
pub fn private_key_pem(key_pair: &KeyPair) -> SecretString {
    SecretString::new(key_pair.serialize_pem())
}

/// Protect a PKCS#8 (or PKCS#1 RSA) PEM private key with `passphrase`,
/// producing an `ENCRYPTED PRIVATE KEY` block (PBES2, PBKDF2-SHA256, AES-256-CBC).
pub fn encrypt_private_key(pem: &str, passphrase: &str) -> Result<SecretString> {
    if passphrase.is_empty() {
        return Err(Error::invalid_request("key passphrase cannot be empty"));
    }

    let document = pkcs8_document(pem)?;
    let info = PrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| Error::key_material(format!("invalid PKCS#8 key: {}", e)))?;

    let mut rng = rand::thread_rng();
    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(PBKDF2_ITERATIONS, &salt, &iv)
        .map_err(|e| Error::key_material(format!("invalid encryption parameters: {}", e)))?;
    let encrypted = info
        .encrypt_with_params(params, passphrase.as_bytes())
        .map_err(|e| Error::key_material(format!("private key encryption failed: {}", e)))?;

    let pem = encrypted
        .to_pem(ENCRYPTED_PRIVATE_KEY_LABEL, LineEnding::LF)
        .map_err(|e| Error::key_material(format!("encrypted key encoding failed: {}", e)))?;
    Ok(SecretString::new(pem.as_str()))
}

/// Decrypt an `ENCRYPTED PRIVATE KEY` block into unencrypted PKCS#8 PEM.
///
/// # Errors
///
/// [`Error::KeyMaterial`] for a wrong passphrase or a block that is not an
/// encrypted PKCS#8 key.
pub fn decrypt_private_key(pem: &str, passphrase: &str) -> Result<SecretString> {
    let (label, document) = SecretDocument::from_pem(pem.trim())
        .map_err(|e| Error::key_material(format!("invalid private key PEM: {}", e)))?;
    if label != ENCRYPTED_PRIVATE_KEY_LABEL {
        return Err(Error::key_material(format!("expected an encrypted key, found '{}'", label)));
    }

    let decrypted = EncryptedPrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| Error::key_material(format!("invalid encrypted key: {}", e)))?
        .decrypt(passphrase.as_bytes())
        .map_err(|_| Error::key_material("private key could not be decrypted with the passphrase"))?;

    let pem = decrypted
        .to_pem(PRIVATE_KEY_LABEL, LineEnding::LF)
        .map_err(|e| Error::key_material(format!("decrypted key encoding failed: {}", e)))?;
    Ok(SecretString::new(pem.as_str()))
}

/// Whether a PEM private key is passphrase-protected.
pub fn is_encrypted_key(pem: &str) -> bool {
    pem.contains(ENCRYPTED_PRIVATE_KEY_LABEL)
}

fn pkcs8_document(pem: &str) -> Result<SecretDocument> {
    let (label, document) = SecretDocument::from_pem(pem.trim())
        .map_err(|e| Error::key_material(format!("invalid private key PEM: {}", e)))?;

    match label {
        PRIVATE_KEY_LABEL => Ok(document),
        RSA_PRIVATE_KEY_LABEL => {
            use rsa::pkcs1::DecodeRsaPrivateKey;
            let key = rsa::RsaPrivateKey::from_pkcs1_der(document.as_bytes())
                .map_err(|e| Error::key_material(format!("invalid PKCS#1 key: {}", e)))?;
            key.to_pkcs8_der()
                .map_err(|e| Error::key_material(format!("PKCS#8 conversion failed: {}", e)))
        }
        other => Err(Error::key_material(format!("unsupported private key block '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_parsing() {
        assert_eq!("RSA".parse::<KeyType>().unwrap(), KeyType::Rsa2048);
        assert_eq!("ecdsa-p384".parse::<KeyType>().unwrap(), KeyType::EcdsaP384);
        assert!("dsa".parse::<KeyType>().is_err());
        assert_eq!(KeyType::default(), KeyType::Rsa2048);
    }

    #[test]
    fn test_rsa_key_is_2048_bits() {
        use rsa::pkcs8::DecodePrivateKey;
        use rsa::traits::PublicKeyParts;

        let key_pair = generate_key(KeyType::Rsa2048).unwrap();
        let key = rsa::RsaPrivateKey::from_pkcs8_pem(&key_pair.serialize_pem()).unwrap();
        assert_eq!(key.size() * 8, 2048);
    }

    #[test]
    fn test_encrypt_then_decrypt_restores_key() {
        let key_pair = generate_key(KeyType::EcdsaP256).unwrap();
        let clear = private_key_pem(&key_pair);

        let encrypted = encrypt_private_key(clear.expose_secret(), "correct horse").unwrap();
        assert!(is_encrypted_key(encrypted.expose_secret()));
        assert!(!encrypted.expose_secret().contains(clear.expose_secret()));

        let decrypted = decrypt_private_key(encrypted.expose_secret(), "correct horse").unwrap();
        let reloaded = KeyPair::from_pem(decrypted.expose_secret()).unwrap();
        assert_eq!(reloaded.public_key_der(), key_pair.public_key_der());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let key_pair = generate_key(KeyType::EcdsaP256).unwrap();
        let encrypted =
            encrypt_private_key(private_key_pem(&key_pair).expose_secret(), "right").unwrap();
        let err = decrypt_private_key(encrypted.expose_secret(), "wrong").unwrap_err();
        assert!(matches!(err, Error::KeyMaterial { .. }));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let key_pair = generate_key(KeyType::EcdsaP256).unwrap();
        assert!(encrypt_private_key(&key_pair.serialize_pem(), "").is_err());
    }
}
