//! OAuth 2.0 authentication for the Spotify Web API
//!
//! Implements the Authorization Code flow: an authorization URL is shown to the
//! user, the returned code is exchanged for tokens, and expired access tokens are
//! refreshed transparently through a [`TokenManager`].

mod accounts;
mod token_store;

pub use accounts::{authorize_url, generate_state, parse_redirect, AccountsClient, SCOPES};
pub use token_store::TokenStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tokens are treated as expired this many seconds before their real expiry
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// Errors that can occur while authenticating
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token has been obtained yet
    #[error("not authenticated; authorize the application first")]
    NotAuthenticated,

    /// The access token expired and there is no refresh token to renew it
    #[error("access token expired and no refresh token is available")]
    NoRefreshToken,

    /// The token endpoint rejected the request
    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    /// The authorization redirect carried an error instead of a code
    #[error("authorization denied: {0}")]
    Denied(String),

    /// The redirect URL could not be used
    #[error("invalid redirect URL: {0}")]
    InvalidRedirect(String),

    /// The redirect state does not match the one we sent
    #[error("state mismatch in authorization redirect")]
    StateMismatch,

    /// HTTP request to the accounts service failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Reading or writing the token file failed
    #[error("token store error: {0}")]
    Store(String),
}

/// Application credentials registered with Spotify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// An OAuth access token with its expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    /// Absent when the accounts service did not issue one
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Token {
    /// Creates a token that expires `expires_in` seconds after `now`
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: now + Duration::seconds(expires_in),
            scope: None,
        }
    }

    /// Whether the token should be refreshed before use at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECONDS)
    }
}

/// The accounts service operations the token manager relies on
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchanges an authorization code for a token
    async fn exchange_code(&self, credentials: &Credentials, code: &str) -> Result<Token, AuthError>;

    /// Obtains a fresh access token from a refresh token
    async fn refresh(&self, credentials: &Credentials, refresh_token: &str) -> Result<Token, AuthError>;
}

/// Owns the current token and renews it when needed
pub struct TokenManager<E> {
    endpoint: E,
    credentials: Credentials,
    token: Option<Token>,
    store: Option<TokenStore>,
}

impl<E: TokenEndpoint> TokenManager<E> {
    pub fn new(endpoint: E, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
            token: None,
            store: None,
        }
    }

    /// Persists every new token to `store`
    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Starts from an already known token
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Loads the persisted token, if any, from the configured store
    pub fn load_stored(&mut self) -> Result<bool, AuthError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.load()? {
            Some(token) => {
                debug!(expires_at = %token.expires_at, "loaded stored token");
                self.token = Some(token);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Returns a usable access token
    ///
    /// An expired token is refreshed exactly once; if that fails the error is
    /// returned and no further attempt is made.
    pub async fn access_token(&mut self) -> Result<String, AuthError> {
        match &self.token {
            Some(token) if !token.is_expired(Utc::now()) => Ok(token.access_token.clone()),
            Some(_) => {
                debug!("access token expired, refreshing");
                self.refresh().await
            }
            None => Err(AuthError::NotAuthenticated),
        }
    }

    /// Performs a single refresh and returns the new access token
    pub async fn refresh(&mut self) -> Result<String, AuthError> {
        let refresh_token = self
            .token
            .as_ref()
            .ok_or(AuthError::NotAuthenticated)?
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;

        let mut fresh = match self.endpoint.refresh(&self.credentials, &refresh_token).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                return Err(e);
            }
        };
        // Spotify usually omits the refresh token on refresh; the old one stays valid.
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token);
        }

        info!(expires_at = %fresh.expires_at, "access token refreshed");
        self.install(fresh)
    }

    /// Completes the authorization flow with the code from the redirect
    pub async fn authorize_with_code(&mut self, code: &str) -> Result<(), AuthError> {
        let token = self.endpoint.exchange_code(&self.credentials, code).await?;
        info!(expires_at = %token.expires_at, "authorization code exchanged");
        self.install(token).map(|_| ())
    }

    fn install(&mut self, token: Token) -> Result<String, AuthError> {
        if let Some(store) = &self.store {
            store.save(&token)?;
        }
        let access = token.access_token.clone();
        self.token = Some(token);
        Ok(access)
    }
}
