//! Token-exchange relay for the gatehouse session core.
//!
//! The OAuth client secret must never reach the client side, so code
//! exchange and token refresh go through this small server instead of
//! straight to the provider. It forwards grants to GitHub's
//! access-token endpoint and passes responses through unmodified.
//!
//! # Components
//!
//! - [`server`] — Axum server exposing `/oauth/token`, `/oauth/refresh`, `/health`
//! - [`upstream`] — The provider-facing client holding the secret
//! - [`error`] — Failure taxonomy and its HTTP mapping

pub mod error;
pub mod server;
pub mod upstream;

pub use error::{RelayError, Result};
pub use server::{RelayConfig, RelayServer};
pub use upstream::UpstreamClient;
