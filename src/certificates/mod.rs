//! # Certificates
//!
//! Key generation and protection, CSR construction, certificate parsing and
//! the validator that compares returned certificates with what was asked for.

pub mod csr;
pub mod keys;
pub mod matching;
pub mod parse;
pub mod validator;

pub use csr::{build_csr, parse_csr, CsrSubject, ParsedCsr};
pub use keys::{
    decrypt_private_key, encrypt_private_key, generate_key, is_encrypted_key, private_key_pem,
    KeyType,
};
pub use matching::ensure_key_pair;
pub use parse::{
    canonical_ip, certificate_blocks, format_serial, normalize_serial, parse_certificate_der,
    parse_certificate_pem, ParsedCertificate, PublicKeyInfo, SubjectNames,
};
pub use validator::{
    canonical_ip_string, check_common_name, check_csr_public_key, check_dns_names,
    check_email_addresses, check_ip_addresses, check_issuer, check_key_pair, check_organization,
    validate_issued, validate_signed, ExpectedIdentity, ValidationPolicy,
};
