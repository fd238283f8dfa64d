//! Durable key/value persistence for encrypted credential material.
//!
//! The store is a thin, swappable abstraction with no business logic.
//! Only the session manager writes through it, and every token value it
//! sees is already encrypted; plaintext tokens never reach a store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AuthError, Result};

/// Keys the session manager writes through the store.
pub mod keys {
    /// Encrypted access-token blob.
    pub const ACCESS_TOKEN: &str = "credential.token";
    /// RFC 3339 expiry instant.
    pub const EXPIRES_AT: &str = "credential.expires_at";
    /// JSON array of granted scopes.
    pub const SCOPES: &str = "credential.scopes";
}

/// Swappable persistence for encrypted credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Store a value under a key, replacing any prior value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Fetch the value for a key, if present.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Shared credential store for use across async contexts.
pub type SharedCredentialStore = Arc<dyn CredentialStore>;

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store, the default for tab-scoped session lifetimes and
/// for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// File-backed store keeping all entries in one JSON map.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the backing file.
    lock: RwLock<()>,
}

impl FileStore {
    /// Create a store backed by `credentials.json` in the given directory.
    pub fn new(dir: &Path) -> Self {
        Self::with_path(dir.join("credentials.json"))
    }

    /// Create a store backed by a specific file path.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            lock: RwLock::new(()),
        }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_map(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| AuthError::Storage(format!("Failed to read credential file: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| AuthError::Serialization(format!("Failed to parse credential file: {}", e)))
    }

    fn save_map(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthError::Storage(format!("Failed to create credential directory: {}", e))
            })?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| AuthError::Serialization(format!("Failed to serialize entries: {}", e)))?;
        std::fs::write(&self.path, json)
            .map_err(|e| AuthError::Storage(format!("Failed to write credential file: {}", e)))
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut entries = self.load_map()?;
        entries.insert(key.to_string(), value.to_string());
        self.save_map(&entries)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.read().await;
        Ok(self.load_map()?.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut entries = self.load_map()?;
        if entries.remove(key).is_some() {
            self.save_map(&entries)?;
        }
        Ok(())
    }
}
