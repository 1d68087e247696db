use thiserror::Error;

/// Failures reported by an authority connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The bearer token was rejected and can be refreshed
    #[error("access token expired or revoked: {0}")]
    AuthenticationExpired(String),

    /// Credentials were rejected and refreshing will not help
    #[error("credentials rejected: {0}")]
    AuthenticationRejected(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("authority responded with status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The authority answered with something that could not be used
    #[error("unusable response: {0}")]
    InvalidResponse(String),

    /// The certificate was still pending when the retrieval deadline passed
    #[error("certificate {reference} still pending after {waited_secs}s")]
    Pending { reference: String, waited_secs: u64 },

    #[error("operation not supported by {authority}: {operation}")]
    Unsupported { authority: String, operation: &'static str },

    /// The request could not be expressed to this authority
    #[error("request rejected locally: {0}")]
    InvalidRequest(String),
}

impl ConnectorError {
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            ConnectorError::AuthenticationExpired(_) | ConnectorError::AuthenticationRejected(_)
        )
    }

    /// Whether a token refresh followed by one retry may succeed.
    pub fn is_refreshable(&self) -> bool {
        matches!(self, ConnectorError::AuthenticationExpired(_))
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ConnectorError::Network(format!("request timed out: {}", error))
        } else if error.is_decode() {
            ConnectorError::InvalidResponse(error.to_string())
        } else {
            ConnectorError::Network(error.to_string())
        }
    }
}
