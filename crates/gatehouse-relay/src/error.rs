//! Error types for the relay.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while relaying a token exchange.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Request body is missing the code or state.
    #[error("Missing required parameters")]
    MissingParams,

    /// Bearer token absent or malformed.
    #[error("Missing or invalid authorization header")]
    MissingAuthorization,

    /// Upstream reported a grant error in an otherwise-successful
    /// response (GitHub's token endpoint answers 200 for bad codes).
    #[error("Upstream rejected the grant: {error}")]
    InvalidGrant { error: String, message: String },

    /// Upstream answered with a non-success status.
    #[error("Upstream error ({status}): {body}")]
    Upstream { status: StatusCode, body: String },

    /// Transport failure talking to the upstream.
    #[error("Network error: {0}")]
    Network(String),

    /// Missing or malformed relay configuration. Fatal at startup.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Network(e.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            RelayError::MissingParams => (
                StatusCode::BAD_REQUEST,
                "invalid_request".to_string(),
                self.to_string(),
            ),
            RelayError::MissingAuthorization => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".to_string(),
                self.to_string(),
            ),
            RelayError::InvalidGrant { error, message } => {
                (StatusCode::BAD_REQUEST, error.clone(), message.clone())
            }
            RelayError::Upstream { status, body } => {
                // Client errors pass through; everything else is a gateway
                // problem from the caller's point of view.
                let status = if status.is_client_error() {
                    *status
                } else {
                    StatusCode::BAD_GATEWAY
                };
                (status, "upstream_error".to_string(), body.clone())
            }
            RelayError::Network(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable".to_string(),
                msg.clone(),
            ),
            RelayError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error".to_string(),
                msg.clone(),
            ),
        };

        let body = serde_json::json!({
            "error": error_type,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
