//! # Error Handling
//!
//! Crate-wide error type, result alias and failure categories, plus the
//! TLS-specific errors raised while loading trust bundles.

pub mod tls;
pub mod types;

pub use tls::TlsError;
pub use types::{Error, ErrorCategory, Result, ValidationField};
