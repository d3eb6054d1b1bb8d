//! Signing key persistence.
//!
//! A [`KeyProvider`] is picked once at startup from [`KeysConfig`] and
//! never switched afterwards. `load_key` returning `Ok(None)` means no key
//! exists yet and the caller should generate one.

pub mod database;
pub mod file;
pub mod store;

pub use database::DatabaseKeyProvider;
pub use file::FileKeyProvider;
pub use store::{KvStore, MemoryKvStore, RedisKvStore, StoreError};

use crate::config::{KeysConfig, KeysStorage};
use crate::crypto::{self, derive_kek, KeyEncryptionKey};
use crate::error::TokenError;
use crate::jwk::{encode_jwk_bytes, Jwk};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::info;

/// Plaintext key file name.
pub const PRIVATE_KEY_FILE: &str = "jwt_private_key.json";

/// Encrypted key file name.
pub const PRIVATE_KEY_FILE_ENCRYPTED: &str = "jwt_private_key.json.enc";

/// Row key of the signing key in the key-value store.
pub const PRIVATE_KEY_DB_KEY: &str = "jwt_private_key.json";

/// Loads and stores the signing key.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Load the stored key, or `None` if there is none yet.
    async fn load_key(&self) -> Result<Option<Jwk>, TokenError>;

    /// Persist a newly created key.
    async fn save_key(&self, key: &Jwk) -> Result<(), TokenError>;

    /// Persist a key that replaces an existing one (operator rotation).
    async fn replace_key(&self, key: &Jwk) -> Result<(), TokenError> {
        self.save_key(key).await
    }

    /// Backend this provider writes to.
    fn storage(&self) -> KeysStorage;
}

/// Derive the KEK if an encryption secret is configured.
///
/// # Errors
///
/// Returns a configuration error if a secret is set without an instance ID.
pub fn load_key_encryption_key(
    config: &KeysConfig,
) -> Result<Option<KeyEncryptionKey>, TokenError> {
    let Some(secret) = config
        .encryption_key
        .as_ref()
        .filter(|s| !s.expose_secret().is_empty())
    else {
        return Ok(None);
    };
    if config.instance_id.is_empty() {
        return Err(TokenError::config(
            "an instance ID is required to derive the key encryption key",
        ));
    }
    derive_kek(secret.expose_secret().as_bytes(), &config.instance_id)
        .map(Some)
        .map_err(|e| TokenError::crypto("failed to derive key encryption key", e))
}

/// Build the provider selected by `config`.
///
/// `store` is required for database storage and ignored otherwise.
///
/// # Errors
///
/// Returns a configuration error for database storage without a KEK or a
/// store.
pub fn get_key_provider(
    config: &KeysConfig,
    store: Option<Arc<dyn KvStore>>,
) -> Result<Box<dyn KeyProvider>, TokenError> {
    let kek = load_key_encryption_key(config)?;
    let encrypted = kek.is_some();

    let provider: Box<dyn KeyProvider> = match config.storage {
        KeysStorage::File => Box::new(FileKeyProvider::new(&config.keys_path, kek)),
        KeysStorage::Database => {
            let store = store.ok_or_else(|| {
                TokenError::config("database key storage requires a key-value store")
            })?;
            Box::new(DatabaseKeyProvider::new(store, kek)?)
        }
    };

    info!(storage = %config.storage, encrypted, "Key provider initialized");
    Ok(provider)
}

/// Encode, encrypt and base64 a key for storage.
pub(crate) fn seal_key(kek: &KeyEncryptionKey, key: &Jwk) -> Result<String, TokenError> {
    let data = encode_jwk_bytes(key)?;
    let enc = crypto::encrypt(kek.as_bytes(), &data, &[])
        .map_err(|e| TokenError::crypto("failed to encrypt key", e))?;
    Ok(STANDARD.encode(enc))
}

/// Reverse of [`seal_key`]. `what` names the source in error messages.
pub(crate) fn open_key(kek: &KeyEncryptionKey, encoded: &str, what: &str) -> Result<Jwk, TokenError> {
    let enc = STANDARD.decode(encoded.trim()).map_err(|e| {
        TokenError::storage(format!("failed to read {what}: not a valid base64-encoded value: {e}"))
    })?;
    let data = crypto::decrypt(kek.as_bytes(), &enc, &[])
        .map_err(|e| TokenError::crypto(format!("failed to decrypt {what}"), e))?;
    Jwk::parse(&data)
        .map_err(|e| TokenError::invalid_key(format!("failed to parse {what}: {e}")))
}
