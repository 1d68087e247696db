use std::sync::Arc;

use rustls::crypto::ring;
use tracing::debug;

use super::trust_bundle::load_trust_bundle;
use crate::config::TransportConfig;
use crate::errors::{Error, Result};

/// Build the HTTP client an authority connector talks through.
///
/// With a trust bundle the client verifies the authority against a freshly
/// built TLS configuration holding only that bundle; nothing shared is
/// modified, so roles with different bundles never interfere. Without one
/// the client uses the bundled web PKI roots. Proxy settings are taken from
/// the environment.
pub fn build_http_client(
    config: &TransportConfig,
    trust_bundle_pem: Option<&str>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .tcp_keepalive(config.keepalive())
        .pool_max_idle_per_host(config.max_idle_connections)
        .pool_idle_timeout(config.idle_timeout())
        .timeout(config.request_timeout())
        .user_agent(concat!("certbroker/", env!("CARGO_PKG_VERSION")));

    if let Some(pem) = trust_bundle_pem {
        let roots = load_trust_bundle(pem)?;
        let tls = rustls::ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::transport(format!("unsupported TLS protocol versions: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        builder = builder.use_preconfigured_tls(tls);
        debug!("HTTP client uses custom trust bundle");
    }

    builder.build().map_err(|e| Error::transport(format!("failed to build HTTP client: {}", e)))
}
