//! The relay HTTP server.
//!
//! Exposes the two endpoints the session core consumes, plus a health
//! probe. The client secret stays here; callers only ever present codes
//! and bearer tokens.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router as AxumRouter,
    extract::State,
    http::HeaderMap,
    http::header::AUTHORIZATION,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{RelayError, Result};
use crate::upstream::UpstreamClient;

/// GitHub's access-token endpoint.
pub const GITHUB_ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// Default timeout for upstream calls.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for the relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub enable_cors: bool,
    /// Public OAuth application id.
    pub client_id: String,
    /// OAuth application secret. Never leaves this process.
    pub client_secret: String,
    /// Provider token endpoint to forward grants to.
    pub upstream_url: String,
    /// Callback URI registered with the provider.
    pub redirect_uri: String,
    pub upstream_timeout: Duration,
}

impl RelayConfig {
    /// Create a GitHub relay config listening on `bind_addr`.
    pub fn github(
        bind_addr: SocketAddr,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Self {
        Self {
            bind_addr,
            enable_cors: true,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            upstream_url: GITHUB_ACCESS_TOKEN_URL.to_string(),
            redirect_uri: redirect_uri.to_string(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Validate the configuration, failing fast before serving.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(RelayError::Config("client_id is not configured".to_string()));
        }
        if !self.client_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RelayError::Config(
                "client_id should only contain alphanumeric characters".to_string(),
            ));
        }
        if self.client_secret.is_empty() {
            return Err(RelayError::Config(
                "client_secret is not configured".to_string(),
            ));
        }
        if !self.upstream_url.starts_with("http://") && !self.upstream_url.starts_with("https://") {
            return Err(RelayError::Config(format!(
                "upstream_url is not an absolute URL: '{}'",
                self.upstream_url
            )));
        }
        if self.redirect_uri.is_empty() {
            return Err(RelayError::Config(
                "redirect_uri is not configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared state for the relay server.
struct RelayState {
    upstream: UpstreamClient,
}

/// The token-exchange relay server.
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Create a relay, failing fast on invalid configuration.
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let upstream = UpstreamClient::new(&config)?;
        Ok(Self {
            state: Arc::new(RelayState { upstream }),
            config,
        })
    }

    /// Build the axum router.
    pub fn router(&self) -> AxumRouter {
        let mut router = AxumRouter::new()
            .route("/oauth/token", post(handle_token))
            .route("/oauth/refresh", post(handle_refresh))
            .route("/health", get(handle_health))
            .with_state(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router
    }

    /// Run the relay server.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Starting token-exchange relay");
        axum::serve(listener, self.router()).await
    }

    /// Run with graceful shutdown, returning the bound address.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Starting token-exchange relay");
        tokio::spawn(async move {
            axum::serve(listener, self.router())
                .with_graceful_shutdown(shutdown)
                .await
                .ok();
        });
        Ok(local_addr)
    }
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// Handle POST /oauth/token
async fn handle_token(
    State(state): State<Arc<RelayState>>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<Value>> {
    let (code, returned_state) = match (body.code, body.state) {
        (Some(code), Some(returned_state)) if !code.is_empty() && !returned_state.is_empty() => {
            (code, returned_state)
        }
        _ => return Err(RelayError::MissingParams),
    };

    let data = state.upstream.exchange_code(&code, &returned_state).await?;
    Ok(Json(data))
}

/// Handle POST /oauth/refresh
async fn handle_refresh(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or(RelayError::MissingAuthorization)?;

    let data = state.upstream.refresh_token(token).await?;
    Ok(Json(data))
}

/// Handle GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "gatehouse-relay"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> RelayConfig {
        RelayConfig::github(
            "127.0.0.1:0".parse().unwrap(),
            "abc123",
            "shhh",
            "http://localhost:5173/auth/callback",
        )
    }

    fn config_against(upstream: &MockServer) -> RelayConfig {
        let mut config = test_config();
        config.upstream_url = format!("{}/login/oauth/access_token", upstream.uri());
        config
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_missing_secret_fails_fast() {
        let mut config = test_config();
        config.client_secret = String::new();
        assert!(matches!(
            RelayServer::new(config),
            Err(RelayError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = RelayServer::new(test_config()).unwrap();
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_token_missing_params_is_bad_request() {
        let server = RelayServer::new(test_config()).unwrap();
        let response = server
            .router()
            .oneshot(post_json("/oauth/token", json!({"code": "abc"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_refresh_missing_bearer_is_unauthorized() {
        let server = RelayServer::new(test_config()).unwrap();
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/oauth/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_token_exchange_passthrough() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_partial_json(json!({
                "client_id": "abc123",
                "client_secret": "shhh",
                "code": "abc"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "gho_tok",
                "token_type": "bearer",
                "scope": "read:user"
            })))
            .mount(&upstream)
            .await;

        let server = RelayServer::new(config_against(&upstream)).unwrap();
        let response = server
            .router()
            .oneshot(post_json("/oauth/token", json!({"code": "abc", "state": "xyz"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["access_token"], "gho_tok");
    }

    #[tokio::test]
    async fn test_upstream_grant_error_becomes_bad_request() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })))
            .mount(&upstream)
            .await;

        let server = RelayServer::new(config_against(&upstream)).unwrap();
        let response = server
            .router()
            .oneshot(post_json("/oauth/token", json!({"code": "stale", "state": "xyz"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "bad_verification_code");
    }

    #[tokio::test]
    async fn test_refresh_forwards_bearer_as_refresh_grant() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_partial_json(json!({
                "grant_type": "refresh_token",
                "refresh_token": "gho_current"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "gho_new",
                "scope": "read:user"
            })))
            .mount(&upstream)
            .await;

        let server = RelayServer::new(config_against(&upstream)).unwrap();
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/oauth/refresh")
                    .header("authorization", "Bearer gho_current")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["access_token"], "gho_new");
    }

    #[tokio::test]
    async fn test_upstream_outage_is_gateway_error() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&upstream)
            .await;

        let server = RelayServer::new(config_against(&upstream)).unwrap();
        let response = server
            .router()
            .oneshot(post_json("/oauth/token", json!({"code": "abc", "state": "xyz"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
