//! High-level API for persisted session credentials.

use crate::{SecureStorage, StorageKeys, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata stored next to the refresh credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSessionMeta {
    /// Normalized login id the session belongs to
    pub login_id: String,
    /// Expiry of the identity token at the time it was stored
    pub expires_at: DateTime<Utc>,
}

/// Stores and clears the refresh credential used for silent resume.
pub struct CredentialStore {
    storage: Box<dyn SecureStorage>,
}

impl CredentialStore {
    /// Create a new credential store with the given storage backend
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Persist everything needed to resume the session later.
    pub fn set_session(
        &self,
        login_id: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.storage.set(StorageKeys::REFRESH_TOKEN, refresh_token)?;
        let meta = StoredSessionMeta {
            login_id: login_id.to_string(),
            expires_at,
        };
        self.storage
            .set(StorageKeys::SESSION_META, &serde_json::to_string(&meta)?)?;
        Ok(())
    }

    pub fn get_refresh_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::REFRESH_TOKEN)
    }

    /// Session metadata; unreadable metadata counts as absent.
    pub fn get_session_meta(&self) -> StorageResult<Option<StoredSessionMeta>> {
        let Some(raw) = self.storage.get(StorageKeys::SESSION_META)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(err) => {
                tracing::warn!(error = %err, "Discarding unreadable session metadata");
                Ok(None)
            }
        }
    }

    pub fn has_session(&self) -> StorageResult<bool> {
        self.storage.has(StorageKeys::REFRESH_TOKEN)
    }

    /// Remove all persisted session material. Missing keys are not an error.
    pub fn clear_session(&self) -> StorageResult<()> {
        self.storage.delete(StorageKeys::REFRESH_TOKEN)?;
        self.storage.delete(StorageKeys::SESSION_META)?;
        Ok(())
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
