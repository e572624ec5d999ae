//! Spotify accounts service client
//!
//! Builds the authorization URL, reads the code back out of the redirect, and
//! talks to the token endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{AuthError, Credentials, Token, TokenEndpoint};

/// Consent page for the Authorization Code flow
const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";

/// Token endpoint for code exchange and refresh
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Scopes needed to read private and collaborative playlists and to rewrite
/// the target playlist
pub const SCOPES: &[&str] = &[
    "playlist-read-private",
    "playlist-read-collaborative",
    "playlist-modify-private",
    "playlist-modify-public",
];

/// Body of a successful token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> Token {
        let mut token = Token::new(self.access_token, self.refresh_token, self.expires_in, Utc::now());
        token.scope = self.scope;
        token
    }
}

/// Client for the Spotify accounts token endpoint
#[derive(Debug, Clone)]
pub struct AccountsClient {
    http_client: Client,
    /// Token endpoint URL (allows override for testing)
    token_url: String,
}

impl AccountsClient {
    /// Creates a client for the production accounts service
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            token_url: TOKEN_URL.to_string(),
        })
    }

    /// Points the client at a different token endpoint
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    async fn request_token(
        &self,
        credentials: &Credentials,
        form: &[(&str, &str)],
    ) -> Result<Token, AuthError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "token endpoint rejected request");
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        debug!(expires_in = token.expires_in, "token endpoint issued token");
        Ok(token.into_token())
    }
}

#[async_trait]
impl TokenEndpoint for AccountsClient {
    async fn exchange_code(&self, credentials: &Credentials, code: &str) -> Result<Token, AuthError> {
        self.request_token(
            credentials,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", credentials.redirect_uri.as_str()),
            ],
        )
        .await
    }

    async fn refresh(&self, credentials: &Credentials, refresh_token: &str) -> Result<Token, AuthError> {
        self.request_token(
            credentials,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }
}

/// Random value for the `state` parameter
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Builds the URL the user opens to grant access
pub fn authorize_url(credentials: &Credentials, scopes: &[&str], state: &str) -> String {
    let mut url = Url::parse(AUTHORIZE_URL).expect("AUTHORIZE_URL is a valid URL");
    url.query_pairs_mut()
        .append_pair("client_id", &credentials.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", &credentials.redirect_uri)
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", state);
    url.to_string()
}

/// Extracts the authorization code from the URL the browser was redirected to
pub fn parse_redirect(redirect: &str, expected_state: &str) -> Result<String, AuthError> {
    let url = Url::parse(redirect.trim()).map_err(|e| AuthError::InvalidRedirect(e.to_string()))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(AuthError::Denied(error));
    }
    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::StateMismatch);
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::InvalidRedirect("no authorization code in URL".to_string()))
}
