//! # Access Token Manager
//!
//! Refreshes bearer tokens for authorities that use them and persists the
//! new pair before anyone is allowed to use it.
//!
//! Refreshes of the same credential are serialized in-process. A caller that
//! waited on the lock and finds the stored pair already rotated gets that
//! pair back without a second refresh on the wire.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::connectors::{Connector, ConnectorError, RefreshRequest};
use crate::errors::{Error, Result};
use crate::roles::{RoleRegistry, TokenPair};

/// Client identifier presented on every refresh.
pub const OAUTH_CLIENT_ID: &str = "hashicorp-vault-by-venafi";
/// Scope requested on every refresh.
pub const OAUTH_SCOPE: &str = "certificate:manage,revoke";

/// Lifecycle of one credential's token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    /// Expiry is within the refresh margin
    Expiring,
    Refreshing,
    /// The last refresh failed; the stored pair was left untouched
    Failed,
}

#[derive(Debug)]
pub struct AccessTokenManager {
    registry: RoleRegistry,
    refresh_margin: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
    states: DashMap<String, TokenState>,
}

impl AccessTokenManager {
    pub fn new(registry: RoleRegistry, refresh_margin: Duration) -> Self {
        Self {
            registry,
            refresh_margin,
            locks: DashMap::new(),
            states: DashMap::new(),
        }
    }

    /// Classify a pair by its expiry. Pairs without a known expiry are
    /// treated as valid until the authority says otherwise.
    pub fn assess(&self, pair: &TokenPair, now: DateTime<Utc>) -> TokenState {
        let Some(expires_at) = pair.expires_at else {
            return TokenState::Valid;
        };
        // An expiry too early to subtract the margin from is long past.
        match expires_at.checked_sub_signed(self.refresh_margin) {
            Some(refresh_at) if refresh_at > now => TokenState::Valid,
            _ => TokenState::Expiring,
        }
    }

    /// Last known state of a credential, if this manager has seen it.
    pub fn state(&self, credential: &str) -> Option<TokenState> {
        self.states.get(credential).map(|state| *state)
    }

    fn set_state(&self, credential: &str, state: TokenState) {
        self.states.insert(credential.to_string(), state);
    }

    fn fail(&self, credential: &str, source: ConnectorError) -> Error {
        self.set_state(credential, TokenState::Failed);
        warn!(credential, error = %source, "Token refresh failed");
        Error::TokenRefresh { credential: credential.to_string(), source }
    }

    /// Exchange the stored refresh token for a new pair and persist it.
    ///
    /// `observed` is the pair the caller was using when it decided to
    /// refresh. The result is only returned once it has been written back.
    ///
    /// # Errors
    ///
    /// - [`Error::TokenRefresh`] when the authority refuses, the call fails
    ///   or either returned token is empty; storage is left unchanged
    /// - [`Error::TokenPersistence`] when the new pair could not be stored
    #[instrument(skip(self, connector, observed), fields(authority = %connector.authority()))]
    pub async fn refresh(
        &self,
        connector: &dyn Connector,
        credential: &str,
        observed: Option<&TokenPair>,
    ) -> Result<TokenPair> {
        let lock = self
            .locks
            .entry(credential.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let stored = self.registry.token_pair(credential).await.inspect_err(|e| {
            self.set_state(credential, TokenState::Failed);
            warn!(credential, error = %e, "Stored token pair could not be read");
        })?;
        let current = match stored {
            Some(pair) => pair,
            None => {
                return Err(self.fail(
                    credential,
                    ConnectorError::AuthenticationRejected("credential has no token pair".into()),
                ))
            }
        };

        if let Some(observed) = observed {
            if current.access_token != observed.access_token
                && self.assess(&current, Utc::now()) == TokenState::Valid
            {
                debug!(credential, "Token pair already rotated by a concurrent refresh");
                self.set_state(credential, TokenState::Valid);
                return Ok(current);
            }
        }

        if current.refresh_token.is_blank() {
            return Err(self.fail(
                credential,
                ConnectorError::AuthenticationRejected("credential has no refresh token".into()),
            ));
        }

        self.set_state(credential, TokenState::Refreshing);
        let response = connector
            .refresh_access_token(&RefreshRequest {
                refresh_token: current.refresh_token.clone(),
                client_id: OAUTH_CLIENT_ID,
                scope: OAUTH_SCOPE,
            })
            .await
            .map_err(|source| self.fail(credential, source))?;

        if response.access_token.is_blank() || response.refresh_token.is_blank() {
            return Err(self.fail(
                credential,
                ConnectorError::InvalidResponse("refresh returned an empty token".into()),
            ));
        }

        let pair = TokenPair {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response.expires_at,
        };

        if let Err(e) = self.registry.store_token_pair(credential, &pair).await {
            self.set_state(credential, TokenState::Failed);
            warn!(credential, error = %e, "Refreshed tokens could not be persisted");
            return Err(Error::TokenPersistence {
                credential: credential.to_string(),
                message: e.to_string(),
            });
        }

        self.set_state(credential, TokenState::Valid);
        info!(credential, expires_at = ?pair.expires_at, "Access token refreshed");
        Ok(pair)
    }
}
