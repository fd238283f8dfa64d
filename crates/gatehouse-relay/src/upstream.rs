//! Calls to the provider's access-token endpoint.
//!
//! The relay is the only place the client secret lives; responses are
//! passed through to the caller unmodified once grant errors are lifted
//! into the failure taxonomy.

use serde::Serialize;
use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::server::RelayConfig;

#[derive(Debug, Serialize)]
struct CodeExchangeBody<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    state: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshBody<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
    refresh_token: &'a str,
}

/// Client for the provider's token endpoint, holding the secret.
#[derive(Debug)]
pub struct UpstreamClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    upstream_url: String,
    redirect_uri: String,
}

impl UpstreamClient {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            upstream_url: config.upstream_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    /// Trade an authorization code for a token response.
    pub async fn exchange_code(&self, code: &str, state: &str) -> Result<Value> {
        let body = CodeExchangeBody {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            code,
            redirect_uri: &self.redirect_uri,
            state,
        };
        self.post(&body).await
    }

    /// Trade the caller's current token for a renewed one.
    pub async fn refresh_token(&self, current_token: &str) -> Result<Value> {
        let body = RefreshBody {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: "refresh_token",
            refresh_token: current_token,
        };
        self.post(&body).await
    }

    async fn post<B: Serialize + Sync>(&self, body: &B) -> Result<Value> {
        let response = self
            .http
            .post(&self.upstream_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!(%status, "Upstream token endpoint failed");
            return Err(RelayError::Upstream { status, body });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| RelayError::Network(format!("Failed to parse upstream response: {}", e)))?;

        if let Some(error) = data.get("error").and_then(Value::as_str) {
            let message = data
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or("Failed to obtain access token")
                .to_string();
            tracing::warn!(error, "Upstream rejected the grant");
            return Err(RelayError::InvalidGrant {
                error: error.to_string(),
                message,
            });
        }

        Ok(data)
    }
}
