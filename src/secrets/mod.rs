//! Secret material handling.
//!
//! Passwords, API keys, bearer tokens and private keys travel through the
//! crate as [`SecretString`] so they stay out of tracing output and error
//! messages.

pub mod types;

pub use types::{exposed, SecretString};
