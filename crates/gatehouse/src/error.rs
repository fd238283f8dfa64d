//! Error taxonomy for the session core.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while managing an OAuth session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Callback state is missing or does not match the stored nonce.
    #[error("State mismatch, restart the login flow")]
    InvalidState,

    /// The pending authorization outlived its validity window.
    #[error("Login window elapsed, restart the login flow")]
    ExpiredState,

    /// The authorization code was rejected by the provider.
    #[error("Invalid or expired authorization code")]
    InvalidGrant,

    /// The provider rejected the current token.
    #[error("Token rejected by provider")]
    Unauthorized,

    /// Transient provider outage, including request timeouts.
    #[error("Authorization service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Stored credential material failed an integrity check.
    #[error("Stored credential could not be decrypted")]
    DecryptionFailure,

    /// Missing or malformed host configuration. Fatal at construction.
    #[error("Config error: {0}")]
    Config(String),

    /// Local storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network/transport error.
    #[error("Network error: {0}")]
    Network(String),

    /// Provider returned a response outside the expected contract.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// How a host should surface a failure to the user.
///
/// Every [`AuthError`] resolves to one of these. Hosts never need to
/// branch on individual variants to decide what the user sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Send the user back through the login flow. Retrying with the same
    /// code or state cannot succeed, authorization codes are single use.
    ReLogin,
    /// Safe to retry with caller-side backoff.
    Retry,
    /// Drop the session quietly and re-prompt login on next use.
    SilentLogout,
}

impl AuthError {
    /// Map this error to its user-facing disposition.
    pub fn disposition(&self) -> Disposition {
        match self {
            AuthError::InvalidState
            | AuthError::ExpiredState
            | AuthError::InvalidGrant
            | AuthError::Config(_) => Disposition::ReLogin,
            AuthError::ServiceUnavailable(_)
            | AuthError::Storage(_)
            | AuthError::Network(_)
            | AuthError::Backend(_)
            | AuthError::Serialization(_) => Disposition::Retry,
            AuthError::Unauthorized | AuthError::DecryptionFailure => Disposition::SilentLogout,
        }
    }

    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AuthError::ServiceUnavailable(format!("Request timed out: {}", e))
        } else {
            AuthError::Network(e.to_string())
        }
    }
}
