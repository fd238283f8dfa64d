//! OAuth session state machine.
//!
//! Drives login, callback, refresh, and logout transitions, owns the
//! only in-memory copy of the plaintext token, and enforces the
//! encrypt-before-write invariant on the credential store. Constructed
//! once by the host and shared as `Arc<SessionManager>`; there is no
//! ambient global instance.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};

use crate::cipher::TokenCipher;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::exchange::{
    Identity, Repository, SharedExchangeClient, TokenGrant, build_authorization_url,
};
use crate::pending::PendingAuthorization;
use crate::store::{SharedCredentialStore, keys};

/// Default period for the optional background liveness check.
pub const DEFAULT_KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);

/// Authentication state visible to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingCallback,
    Authenticated,
}

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Plaintext bearer token. Lives only in the manager's memory;
    /// persisted exclusively as an encrypted blob.
    pub access_token: String,
    /// Absolute expiry instant. Past it, the token is absent regardless
    /// of what is cached.
    pub expires_at: DateTime<Utc>,
    /// Granted permission scopes.
    pub scopes: Vec<String>,
    /// Repository this session is associated with, if any.
    pub tracked_repository: Option<Repository>,
}

impl Session {
    fn from_grant(grant: TokenGrant) -> Self {
        Self {
            access_token: grant.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(grant.expires_in as i64),
            scopes: grant.scopes,
            tracked_repository: None,
        }
    }

    fn is_past_expiry(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    fn within_refresh_buffer(&self, buffer: Duration) -> bool {
        let buffer = chrono::Duration::from_std(buffer).unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() >= self.expires_at - buffer
    }
}

#[derive(Debug, Default)]
struct SessionState {
    session: Option<Session>,
    pending: Option<PendingAuthorization>,
    /// Bumped on every logout. Refresh results carrying a stale epoch
    /// are discarded: a logout issued mid-refresh wins.
    epoch: u64,
}

/// The OAuth session state machine.
#[derive(Debug)]
pub struct SessionManager {
    config: AuthConfig,
    exchange: SharedExchangeClient,
    cipher: TokenCipher,
    store: SharedCredentialStore,
    // Never held across an await; data is copied out under the lock.
    state: RwLock<SessionState>,
    // Serializes refresh attempts so concurrent callers coalesce onto
    // one outstanding network call.
    refresh_gate: Mutex<()>,
    auth_state: watch::Sender<AuthState>,
}

impl SessionManager {
    /// Construct the manager, failing fast on invalid configuration.
    pub fn new(
        config: AuthConfig,
        exchange: SharedExchangeClient,
        store: SharedCredentialStore,
    ) -> Result<Self> {
        config.validate()?;
        let (auth_state, _) = watch::channel(AuthState::Unauthenticated);
        Ok(Self {
            config,
            exchange,
            cipher: TokenCipher::new(),
            store,
            state: RwLock::new(SessionState::default()),
            refresh_gate: Mutex::new(()),
            auth_state,
        })
    }

    /// Subscribe to authentication state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    /// The current authentication state.
    pub fn auth_state(&self) -> AuthState {
        *self.auth_state.borrow()
    }

    /// Snapshot of the current session, if authenticated.
    pub fn session(&self) -> Option<Session> {
        self.state.read().session.clone()
    }

    /// Whether the current session carries a scope. Pure lookup, no
    /// network call; used to gate capability-specific requests.
    pub fn has_scope(&self, name: &str) -> bool {
        self.state
            .read()
            .session
            .as_ref()
            .is_some_and(|s| s.scopes.iter().any(|scope| scope == name))
    }

    // ========================================================================
    // Login flow
    // ========================================================================

    /// Generate a login URL, overwriting any prior pending authorization.
    ///
    /// Pure local computation; the returned URL embeds a fresh nonce as
    /// the anti-forgery state parameter.
    pub fn begin_login(&self) -> String {
        let pending = PendingAuthorization::generate();
        let url = build_authorization_url(&self.config, pending.nonce());
        self.state.write().pending = Some(pending);

        // A scope-upgrade login keeps the existing session visible until
        // the new token replaces it.
        if self.auth_state() == AuthState::Unauthenticated {
            self.auth_state.send_replace(AuthState::AwaitingCallback);
        }
        tracing::debug!("Login URL generated, awaiting callback");
        url
    }

    /// Complete the callback leg: validate the returned state, exchange
    /// the code, encrypt and persist the grant.
    ///
    /// The pending authorization is consumed unconditionally, success or
    /// failure, so a replayed callback cannot succeed.
    pub async fn complete_login(&self, code: &str, returned_state: &str) -> Result<Session> {
        let pending = self.state.write().pending.take();
        let Some(pending) = pending else {
            self.settle_failed_callback();
            return Err(AuthError::InvalidState);
        };

        if !pending.matches(returned_state) {
            tracing::warn!("Callback state does not match stored nonce");
            self.settle_failed_callback();
            return Err(AuthError::InvalidState);
        }
        if pending.is_expired(self.config.state_window) {
            tracing::warn!("Pending authorization outlived its window");
            self.settle_failed_callback();
            return Err(AuthError::ExpiredState);
        }

        let grant = match self.exchange.exchange_code(code, returned_state).await {
            Ok(grant) => grant,
            Err(err) => {
                self.settle_failed_callback();
                return Err(err);
            }
        };

        let mut session = Session::from_grant(grant);
        if let Err(err) = self.persist(&session).await {
            self.settle_failed_callback();
            return Err(err);
        }
        {
            let mut state = self.state.write();
            // A re-login keeps the previously tracked repository.
            session.tracked_repository =
                state.session.take().and_then(|s| s.tracked_repository);
            state.session = Some(session.clone());
        }
        self.auth_state.send_replace(AuthState::Authenticated);
        tracing::info!(scopes = ?session.scopes, "Authentication completed");
        Ok(session)
    }

    /// Roll back to unauthenticated after a failed callback, unless an
    /// existing session is still live.
    fn settle_failed_callback(&self) {
        if self.state.read().session.is_none() {
            self.auth_state.send_replace(AuthState::Unauthenticated);
        }
    }

    // ========================================================================
    // Token access
    // ========================================================================

    /// Return a token guaranteed valid for at least the refresh buffer,
    /// refreshing transparently when near expiry.
    ///
    /// Returns `None` and transitions to unauthenticated when no usable
    /// credential exists or the refresh attempt fails.
    pub async fn get_valid_token(&self) -> Option<String> {
        let cached = self.state.read().session.clone();
        let session = match cached {
            Some(session) => session,
            None => self.restore().await?,
        };

        if session.is_past_expiry() {
            tracing::info!("Token past expiry, clearing session");
            self.logout().await;
            return None;
        }

        if !session.within_refresh_buffer(self.config.refresh_buffer) {
            return Some(session.access_token);
        }

        if self.refresh().await {
            self.state.read().session.as_ref().map(|s| s.access_token.clone())
        } else {
            None
        }
    }

    /// Load a persisted credential back into memory.
    ///
    /// An entry past its expiry, or one that fails decryption, is
    /// treated as absent: the credential material is purged and `None`
    /// is returned rather than blindly using or refreshing it.
    async fn restore(&self) -> Option<Session> {
        let blob = self.store.get(keys::ACCESS_TOKEN).await.ok().flatten()?;
        let expires_raw = self.store.get(keys::EXPIRES_AT).await.ok().flatten()?;

        let expires_at = match DateTime::parse_from_rfc3339(&expires_raw) {
            Ok(t) => t.with_timezone(&Utc),
            Err(err) => {
                tracing::warn!(%err, "Malformed expiry in credential store, purging");
                self.logout().await;
                return None;
            }
        };

        if Utc::now() >= expires_at {
            tracing::debug!("Stored credential already expired, treating as absent");
            self.logout().await;
            return None;
        }

        let access_token = match self.cipher.decrypt(&blob) {
            Ok(token) => token,
            Err(_) => {
                tracing::warn!("Stored credential failed decryption, treating session as corrupted");
                self.logout().await;
                return None;
            }
        };

        let scopes = match self.store.get(keys::SCOPES).await.ok().flatten() {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };

        let session = Session {
            access_token,
            expires_at,
            scopes,
            tracked_repository: None,
        };
        self.state.write().session = Some(session.clone());
        self.auth_state.send_replace(AuthState::Authenticated);
        tracing::debug!("Session restored from credential store");
        Some(session)
    }

    /// Drop the in-memory session without touching persisted material.
    pub fn clear_cache(&self) {
        self.state.write().session = None;
    }

    // ========================================================================
    // Refresh / logout
    // ========================================================================

    /// Attempt a single token refresh. One attempt only: any failure
    /// performs a full logout and reports `false`, never a retry loop.
    pub async fn refresh(&self) -> bool {
        let _gate = self.refresh_gate.lock().await;

        // Re-check under the gate: a concurrent caller may have finished
        // a refresh while this one waited, in which case we coalesce
        // onto its result instead of issuing a second network call.
        let (current, epoch) = {
            let state = self.state.read();
            match &state.session {
                Some(session) => (session.clone(), state.epoch),
                None => return false,
            }
        };
        if current.is_past_expiry() {
            self.logout().await;
            return false;
        }
        if !current.within_refresh_buffer(self.config.refresh_buffer) {
            return true;
        }

        match self.exchange.refresh(&current.access_token).await {
            Ok(grant) => {
                if self.state.read().epoch != epoch {
                    tracing::debug!("Discarding refresh result, session was logged out");
                    return false;
                }

                let mut session = Session::from_grant(grant);
                if let Err(err) = self.persist(&session).await {
                    tracing::warn!(%err, "Failed to persist refreshed credential");
                    self.logout().await;
                    return false;
                }

                let stale = {
                    let mut state = self.state.write();
                    if state.epoch != epoch {
                        true
                    } else {
                        session.tracked_repository =
                            state.session.take().and_then(|s| s.tracked_repository);
                        state.session = Some(session);
                        false
                    }
                };
                if stale {
                    // A logout raced the store write; purge again so
                    // nothing survives the terminated session.
                    self.purge_store().await;
                    return false;
                }
                tracing::info!("Access token refreshed");
                true
            }
            Err(err) => {
                tracing::warn!(%err, "Token refresh failed, logging out");
                self.logout().await;
                false
            }
        }
    }

    /// Clear the session: in-memory token, scopes, tracked repository,
    /// pending authorization, and all persisted credential material.
    /// Idempotent.
    pub async fn logout(&self) {
        {
            let mut state = self.state.write();
            state.session = None;
            state.pending = None;
            state.epoch += 1;
        }
        self.purge_store().await;
        self.auth_state.send_replace(AuthState::Unauthenticated);
        tracing::debug!("Session cleared");
    }

    async fn purge_store(&self) {
        for key in [keys::ACCESS_TOKEN, keys::EXPIRES_AT, keys::SCOPES] {
            if let Err(err) = self.store.delete(key).await {
                tracing::warn!(%err, key, "Failed to delete credential material");
            }
        }
    }

    /// Encrypt the token and commit it with its metadata. The store only
    /// ever sees the ciphertext blob.
    async fn persist(&self, session: &Session) -> Result<()> {
        let blob = self.cipher.encrypt(&session.access_token)?;
        self.store.put(keys::ACCESS_TOKEN, &blob).await?;
        self.store
            .put(keys::EXPIRES_AT, &session.expires_at.to_rfc3339())
            .await?;
        let scopes = serde_json::to_string(&session.scopes)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        self.store.put(keys::SCOPES, &scopes).await?;
        Ok(())
    }

    // ========================================================================
    // Provider lookups
    // ========================================================================

    /// Fetch the authenticated user's profile.
    ///
    /// Doubles as a token-validity check: a provider 401 forces logout.
    pub async fn identity(&self) -> Result<Identity> {
        let token = self.get_valid_token().await.ok_or(AuthError::Unauthorized)?;
        match self.exchange.fetch_identity(&token).await {
            Ok(identity) => Ok(identity),
            Err(AuthError::Unauthorized) => {
                tracing::info!("Provider rejected the token, logging out");
                self.logout().await;
                Err(AuthError::Unauthorized)
            }
            Err(err) => Err(err),
        }
    }

    /// Associate the session with a repository. A weak reference: only
    /// an identifier for subsequent queries.
    pub async fn set_tracked_repository(&self, full_name: &str) -> Result<Repository> {
        let token = self.get_valid_token().await.ok_or(AuthError::Unauthorized)?;
        let repository = self.exchange.fetch_repository(&token, full_name).await?;
        if let Some(session) = self.state.write().session.as_mut() {
            session.tracked_repository = Some(repository.clone());
        }
        Ok(repository)
    }

    /// The repository this session tracks, if any.
    pub fn tracked_repository(&self) -> Option<Repository> {
        self.state
            .read()
            .session
            .as_ref()
            .and_then(|s| s.tracked_repository.clone())
    }

    // ========================================================================
    // Keepalive
    // ========================================================================

    /// Spawn a background liveness check running every `period`.
    ///
    /// Validates the session defensively via `get_valid_token` and an
    /// identity fetch. Transient failures are tolerated without tearing
    /// down the session; only a provider 401 logs out.
    pub fn spawn_keepalive(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut misses: u32 = 0;
            loop {
                interval.tick().await;
                if manager.auth_state() != AuthState::Authenticated {
                    misses = 0;
                    continue;
                }
                let Some(token) = manager.get_valid_token().await else {
                    misses = 0;
                    continue;
                };
                match manager.exchange.fetch_identity(&token).await {
                    Ok(_) => misses = 0,
                    Err(AuthError::Unauthorized) => {
                        tracing::info!("Keepalive saw a revoked token, logging out");
                        manager.logout().await;
                        misses = 0;
                    }
                    Err(err) => {
                        misses += 1;
                        if misses > 1 {
                            tracing::warn!(%err, misses, "Keepalive missing the provider");
                        } else {
                            tracing::debug!(%err, "Keepalive miss, tolerating");
                        }
                    }
                }
            }
        })
    }
}
