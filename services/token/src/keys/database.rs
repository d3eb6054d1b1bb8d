//! Key-value-store-backed key provider.
//!
//! The key is always encrypted here: the database is assumed to be less
//! access-controlled than the local filesystem.

use super::store::{KvStore, StoreError};
use super::{open_key, seal_key, KeyProvider, PRIVATE_KEY_DB_KEY};
use crate::config::KeysStorage;
use crate::crypto::KeyEncryptionKey;
use crate::error::TokenError;
use crate::jwk::Jwk;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument};

/// Deadline for each store call.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Stores the encrypted signing key as a single row.
pub struct DatabaseKeyProvider {
    store: Arc<dyn KvStore>,
    kek: KeyEncryptionKey,
    timeout: Duration,
}

impl DatabaseKeyProvider {
    /// Provider over `store`. A KEK is mandatory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `kek` is `None`.
    pub fn new(store: Arc<dyn KvStore>, kek: Option<KeyEncryptionKey>) -> Result<Self, TokenError> {
        let kek = kek.ok_or_else(|| {
            TokenError::config("an encryption key is required when using the 'database' key provider")
        })?;
        Ok(Self {
            store,
            kek,
            timeout: STORE_TIMEOUT,
        })
    }

    /// Override the per-call deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl KeyProvider for DatabaseKeyProvider {
    #[instrument(skip(self))]
    async fn load_key(&self) -> Result<Option<Jwk>, TokenError> {
        let value = self
            .bounded(self.store.get(PRIVATE_KEY_DB_KEY))
            .await
            .map_err(|e| {
                TokenError::storage(format!(
                    "failed to retrieve private key from the database: {e}"
                ))
            })?;

        match value.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(encoded) => open_key(&self.kek, encoded, "private key").map(Some),
        }
    }

    /// Insert-only. When replicas race on first boot exactly one insert
    /// wins; the others get a fatal conflict and load the winner's key after
    /// restarting.
    #[instrument(skip(self, key), fields(kid = key.key_id()))]
    async fn save_key(&self, key: &Jwk) -> Result<(), TokenError> {
        let encoded = seal_key(&self.kek, key)?;
        match self
            .bounded(self.store.insert(PRIVATE_KEY_DB_KEY, &encoded))
            .await
        {
            Ok(()) => Ok(()),
            Err(err @ StoreError::Conflict { .. }) => {
                error!(
                    "A private key was stored by another instance first; this process must restart to load it"
                );
                Err(TokenError::Store(err))
            }
            Err(err) => Err(TokenError::storage(format!(
                "failed to store private key in database: {err}"
            ))),
        }
    }

    #[instrument(skip(self, key), fields(kid = key.key_id()))]
    async fn replace_key(&self, key: &Jwk) -> Result<(), TokenError> {
        let encoded = seal_key(&self.kek, key)?;
        self.bounded(self.store.put(PRIVATE_KEY_DB_KEY, &encoded))
            .await
            .map_err(|e| TokenError::storage(format!("failed to store private key in database: {e}")))
    }

    fn storage(&self) -> KeysStorage {
        KeysStorage::Database
    }
}
