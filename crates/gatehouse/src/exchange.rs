//! Outbound calls to the authorization endpoints.
//!
//! Everything that talks to the relay or the provider API lives behind
//! the [`ExchangeClient`] trait so tests can swap in a double. Calls are
//! single-shot with a bounded timeout and no internal retry; retry
//! policy belongs to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

/// Token expiry the provider's response implies when it omits
/// `expires_in` (classic GitHub OAuth tokens carry none).
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Accept header for GitHub REST calls.
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

/// Token grant returned from an exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: u64,
    pub scopes: Vec<String>,
}

/// Authenticated user profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    pub handle: String,
    pub display_name: String,
    pub avatar_url: String,
    pub email: Option<String>,
}

/// Repository reference a session may track. An identifier only, never
/// ownership of the repository's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub private: bool,
    pub html_url: String,
}

/// Client for the identity provider's authorization endpoints.
#[async_trait]
pub trait ExchangeClient: Send + Sync + std::fmt::Debug {
    /// Trade an authorization code for a token grant.
    async fn exchange_code(&self, code: &str, state: &str) -> Result<TokenGrant>;

    /// Trade the current token for a renewed grant. Providers that lack
    /// true refresh reissue a token of equal validity; callers treat
    /// both the same.
    async fn refresh(&self, current_token: &str) -> Result<TokenGrant>;

    /// Fetch the authenticated user's profile. A 401 here is equivalent
    /// to an expired or revoked token.
    async fn fetch_identity(&self, token: &str) -> Result<Identity>;

    /// Fetch a repository by `owner/name`.
    async fn fetch_repository(&self, token: &str, full_name: &str) -> Result<Repository>;
}

/// Shared exchange client for use across async contexts.
pub type SharedExchangeClient = Arc<dyn ExchangeClient>;

/// Build the authorization URL embedding the nonce as the anti-forgery
/// state parameter. Never includes the client secret.
pub fn build_authorization_url(config: &AuthConfig, nonce: &str) -> String {
    let params = [
        ("client_id", config.client_id.as_str()),
        ("redirect_uri", config.redirect_uri.as_str()),
        ("scope", config.scope.as_str()),
        ("state", nonce),
    ];

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", config.authorize_url, query)
}

/// Split a provider scope string into a scope list.
///
/// GitHub returns comma-separated scopes; requests use spaces. Both are
/// accepted.
pub fn parse_scope_list(scope: &str) -> Vec<String> {
    scope
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    code: &'a str,
    state: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl TokenResponse {
    /// GitHub reports a bad code as a 200 with an `error` field; an
    /// error or missing token is an invalid grant either way.
    fn into_grant(self) -> Result<TokenGrant> {
        if let Some(error) = self.error {
            tracing::warn!(%error, "Provider rejected the grant");
            return Err(AuthError::InvalidGrant);
        }
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidGrant)?;
        Ok(TokenGrant {
            access_token,
            expires_in: self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            scopes: parse_scope_list(self.scope.as_deref().unwrap_or_default()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: u64,
    login: String,
    #[serde(default)]
    name: Option<String>,
    avatar_url: String,
    #[serde(default)]
    email: Option<String>,
}

// ============================================================================
// HttpExchangeClient
// ============================================================================

/// Production exchange client backed by reqwest.
#[derive(Debug)]
pub struct HttpExchangeClient {
    http: reqwest::Client,
    config: AuthConfig,
}

impl HttpExchangeClient {
    /// Build a client with the configured request timeout.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Partition a non-success response into the failure taxonomy.
    async fn partition_failure(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        match status {
            StatusCode::BAD_REQUEST => AuthError::InvalidGrant,
            StatusCode::UNAUTHORIZED => AuthError::Unauthorized,
            s if s.is_server_error() => AuthError::ServiceUnavailable(body),
            s => AuthError::Backend(format!("Unexpected status {}: {}", s, body)),
        }
    }
}

#[async_trait]
impl ExchangeClient for HttpExchangeClient {
    async fn exchange_code(&self, code: &str, state: &str) -> Result<TokenGrant> {
        let response = self
            .http
            .post(&self.config.token_url)
            .json(&TokenExchangeRequest { code, state })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::partition_failure(response).await);
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Backend(format!("Failed to parse token response: {}", e)))?;
        parsed.into_grant()
    }

    async fn refresh(&self, current_token: &str) -> Result<TokenGrant> {
        let response = self
            .http
            .post(&self.config.refresh_url)
            .bearer_auth(current_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::partition_failure(response).await);
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Backend(format!("Failed to parse refresh response: {}", e)))?;
        parsed.into_grant()
    }

    async fn fetch_identity(&self, token: &str) -> Result<Identity> {
        let response = self
            .http
            .get(format!("{}/user", self.config.api_url))
            .bearer_auth(token)
            .header(ACCEPT, GITHUB_ACCEPT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::partition_failure(response).await);
        }

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Backend(format!("Failed to parse user response: {}", e)))?;
        Ok(Identity {
            id: user.id,
            display_name: user.name.unwrap_or_else(|| user.login.clone()),
            handle: user.login,
            avatar_url: user.avatar_url,
            email: user.email,
        })
    }

    async fn fetch_repository(&self, token: &str, full_name: &str) -> Result<Repository> {
        let response = self
            .http
            .get(format!("{}/repos/{}", self.config.api_url, full_name))
            .bearer_auth(token)
            .header(ACCEPT, GITHUB_ACCEPT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::partition_failure(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Backend(format!("Failed to parse repository response: {}", e)))
    }
}
