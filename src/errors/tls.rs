use std::path::PathBuf;

use thiserror::Error;

/// Failures turning trust-bundle PEM into a certificate verification pool.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The bundle was empty or only whitespace.
    #[error("trust bundle PEM data is empty")]
    EmptyTrustBundle,

    /// The bundle contained no CERTIFICATE blocks.
    #[error("trust bundle does not contain any certificates")]
    NoCertificates,

    /// A PEM section could not be decoded.
    #[error("trust bundle is not a valid PEM: {source}")]
    InvalidPem {
        #[source]
        source: anyhow::Error,
    },

    /// A decoded certificate was refused by the verification pool.
    #[error("certificate #{index} in trust bundle was rejected: {source}")]
    RejectedCertificate {
        index: usize,
        #[source]
        source: rustls::Error,
    },

    /// The bundle file named in a role request could not be read.
    #[error("failed to read trust bundle at {path}: {source}")]
    BundleReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
