//! Ephemeral state bridging the login redirect and the callback.
//!
//! A [`PendingAuthorization`] is created when a login URL is generated,
//! consumed exactly once when the provider redirects back, and discarded
//! on success or failure. It never outlives one authentication attempt.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;

/// Anti-forgery nonce plus creation time for one login attempt.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    nonce: String,
    created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    /// Generate a fresh pending authorization with an unguessable nonce.
    pub fn generate() -> Self {
        let mut nonce_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut nonce_bytes);
        Self {
            nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
            created_at: Utc::now(),
        }
    }

    /// The nonce carried through the redirect as the `state` parameter.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Whether the state returned by the provider matches this nonce.
    pub fn matches(&self, returned_state: &str) -> bool {
        !returned_state.is_empty() && self.nonce == returned_state
    }

    /// Whether this authorization has outlived its validity window.
    pub fn is_expired(&self, window: std::time::Duration) -> bool {
        match Utc::now().signed_duration_since(self.created_at).to_std() {
            Ok(age) => age > window,
            // created_at in the future means the clock moved; keep the
            // attempt live for its window rather than rejecting it.
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_nonce_generation() {
        let a = PendingAuthorization::generate();
        let b = PendingAuthorization::generate();
        assert!(!a.nonce().is_empty());
        assert_ne!(a.nonce(), b.nonce());
    }

    #[test]
    fn test_nonce_is_url_safe() {
        let pending = PendingAuthorization::generate();
        assert!(
            pending
                .nonce()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "nonce should be URL-safe: {}",
            pending.nonce()
        );
    }

    #[test]
    fn test_matches_exact_nonce_only() {
        let pending = PendingAuthorization::generate();
        assert!(pending.matches(pending.nonce()));
        assert!(!pending.matches("some-other-state"));
        assert!(!pending.matches(""));
    }

    #[test]
    fn test_fresh_authorization_not_expired() {
        let pending = PendingAuthorization::generate();
        assert!(!pending.is_expired(Duration::from_secs(600)));
    }

    #[test]
    fn test_stale_authorization_expired() {
        let pending = PendingAuthorization {
            nonce: "n".to_string(),
            created_at: Utc::now() - chrono::Duration::minutes(11),
        };
        assert!(pending.is_expired(Duration::from_secs(600)));
    }

    #[test]
    fn test_future_created_at_not_expired() {
        let pending = PendingAuthorization {
            nonce: "n".to_string(),
            created_at: Utc::now() + chrono::Duration::minutes(5),
        };
        assert!(!pending.is_expired(Duration::from_secs(600)));
    }
}
