//! Host-supplied configuration for the session core.
//!
//! The core never loads configuration itself. Client id, endpoint URLs,
//! and timing knobs are inputs from the host; the client secret never
//! appears here, it lives on the relay side only.

use std::time::Duration;

use crate::error::{AuthError, Result};

/// Validity window for a pending authorization.
pub const DEFAULT_STATE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Buffer time before expiry at which a refresh is attempted.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Default timeout for outbound requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth configuration for the session core.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Public OAuth application id.
    pub client_id: String,
    /// Provider authorization page the user is redirected to.
    pub authorize_url: String,
    /// Relay endpoint that trades a code for a token.
    pub token_url: String,
    /// Relay endpoint that trades a current token for a renewed one.
    pub refresh_url: String,
    /// Provider API base for identity and repository lookups.
    pub api_url: String,
    /// Callback URI registered with the provider.
    pub redirect_uri: String,
    /// Space-separated scopes requested at login.
    pub scope: String,
    /// How long a pending authorization stays valid.
    pub state_window: Duration,
    /// How close to expiry a token triggers a refresh.
    pub refresh_buffer: Duration,
    /// Bound on every outbound network call.
    pub request_timeout: Duration,
}

impl AuthConfig {
    /// Create a GitHub config with the given app id, relay base URL, and
    /// registered callback URI.
    pub fn github(client_id: &str, relay_url: &str, redirect_uri: &str) -> Self {
        let relay_url = relay_url.trim_end_matches('/');
        Self {
            client_id: client_id.to_string(),
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: format!("{}/oauth/token", relay_url),
            refresh_url: format!("{}/oauth/refresh", relay_url),
            api_url: "https://api.github.com".to_string(),
            redirect_uri: redirect_uri.to_string(),
            scope: "read:user user:email".to_string(),
            state_window: DEFAULT_STATE_WINDOW,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Validate the configuration, failing fast before any auth attempt
    /// is possible.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(AuthError::Config("client_id is not configured".to_string()));
        }
        if !self.client_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AuthError::Config(
                "client_id should only contain alphanumeric characters".to_string(),
            ));
        }
        for (name, value) in [
            ("authorize_url", &self.authorize_url),
            ("token_url", &self.token_url),
            ("refresh_url", &self.refresh_url),
            ("api_url", &self.api_url),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(AuthError::Config(format!(
                    "{} is not an absolute URL: '{}'",
                    name, value
                )));
            }
        }
        if self.redirect_uri.is_empty() {
            return Err(AuthError::Config(
                "redirect_uri is not configured".to_string(),
            ));
        }
        if self.state_window.is_zero() {
            return Err(AuthError::Config(
                "state_window must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AuthConfig {
        AuthConfig::github("Iv1abc123", "http://localhost:8788", "http://localhost:5173/auth/callback")
    }

    #[test]
    fn test_github_config_endpoints() {
        let config = valid_config();
        assert_eq!(config.token_url, "http://localhost:8788/oauth/token");
        assert_eq!(config.refresh_url, "http://localhost:8788/oauth/refresh");
        assert!(config.authorize_url.contains("github.com"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relay_url_trailing_slash() {
        let config = AuthConfig::github("abc", "http://localhost:8788/", "http://x/cb");
        assert_eq!(config.token_url, "http://localhost:8788/oauth/token");
    }

    #[test]
    fn test_missing_client_id_rejected() {
        let mut config = valid_config();
        config.client_id = String::new();
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_non_alphanumeric_client_id_rejected() {
        let mut config = valid_config();
        config.client_id = "abc$123".to_string();
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_relative_token_url_rejected() {
        let mut config = valid_config();
        config.token_url = "/oauth/token".to_string();
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_zero_state_window_rejected() {
        let mut config = valid_config();
        config.state_window = Duration::ZERO;
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }
}
