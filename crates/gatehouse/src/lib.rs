//! GitHub OAuth session management SDK.
//!
//! A standalone session core for redirect-based OAuth: the host asks for
//! a login URL, hands back the provider's `code` and `state`, and from
//! then on retrieves a valid token on demand. Tokens are encrypted
//! before they touch durable storage and refreshed transparently near
//! expiry.
//!
//! # Components
//!
//! - [`session`] — State machine: login, callback, refresh, logout
//! - [`exchange`] — Outbound calls to the authorization endpoints
//! - [`cipher`] — Authenticated encryption for tokens at rest
//! - [`store`] — Swappable persistence for encrypted credentials
//! - [`config`] / [`error`] — Host inputs and the failure taxonomy

pub mod cipher;
pub mod config;
pub mod error;
pub mod exchange;
pub mod pending;
pub mod session;
pub mod store;

pub use cipher::TokenCipher;
pub use config::AuthConfig;
pub use error::{AuthError, Disposition, Result};
pub use exchange::{
    ExchangeClient, HttpExchangeClient, Identity, Repository, SharedExchangeClient, TokenGrant,
};
pub use pending::PendingAuthorization;
pub use session::{AuthState, Session, SessionManager};
pub use store::{CredentialStore, FileStore, MemoryStore, SharedCredentialStore};
