//! # Transport
//!
//! Trust bundle loading and construction of the HTTP clients used by the
//! authority connectors.

pub mod client;
pub mod trust_bundle;

pub use client::build_http_client;
pub use trust_bundle::load_trust_bundle;
