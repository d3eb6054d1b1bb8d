//! File-backed key provider.
//!
//! Without a KEK the key lives in `jwt_private_key.json`. With one it lives
//! in `jwt_private_key.json.enc`, and a plaintext file found on load is
//! migrated: the encrypted file is written first, the plaintext removed
//! second, so a crash in between leaves a loadable key behind.

use super::{open_key, seal_key, KeyProvider, PRIVATE_KEY_FILE, PRIVATE_KEY_FILE_ENCRYPTED};
use crate::config::KeysStorage;
use crate::crypto::KeyEncryptionKey;
use crate::error::TokenError;
use crate::jwk::{encode_jwk_bytes, Jwk};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Stores the signing key under a directory.
#[derive(Clone)]
pub struct FileKeyProvider {
    keys_path: PathBuf,
    kek: Option<KeyEncryptionKey>,
}

impl FileKeyProvider {
    /// Provider for `keys_path`, encrypting when `kek` is set.
    pub fn new(keys_path: impl Into<PathBuf>, kek: Option<KeyEncryptionKey>) -> Self {
        Self {
            keys_path: keys_path.into(),
            kek,
        }
    }

    /// Path of the plaintext key file.
    #[must_use]
    pub fn jwk_path(&self) -> PathBuf {
        self.keys_path.join(PRIVATE_KEY_FILE)
    }

    /// Path of the encrypted key file.
    #[must_use]
    pub fn enc_jwk_path(&self) -> PathBuf {
        self.keys_path.join(PRIVATE_KEY_FILE_ENCRYPTED)
    }

    fn load_key_blocking(&self) -> Result<Option<Jwk>, TokenError> {
        match &self.kek {
            Some(kek) => self.load_encrypted_key(kek),
            None => {
                let key = self.load_plain_key()?;
                if key.is_none() && file_exists(&self.enc_jwk_path())? {
                    return Err(TokenError::config(format!(
                        "found encrypted private key file at path '{}' but no encryption key is configured",
                        self.enc_jwk_path().display()
                    )));
                }
                Ok(key)
            }
        }
    }

    fn save_key_blocking(&self, key: &Jwk) -> Result<(), TokenError> {
        match &self.kek {
            Some(kek) => self.save_encrypted_key(kek, key),
            None => self.save_plain_key(key),
        }
    }

    fn load_plain_key(&self) -> Result<Option<Jwk>, TokenError> {
        let path = self.jwk_path();
        if !file_exists(&path)? {
            return Ok(None);
        }

        let data = fs::read(&path).map_err(|e| {
            TokenError::storage(format!(
                "failed to read private key file at path '{}': {e}",
                path.display()
            ))
        })?;
        let key = Jwk::parse(&data).map_err(|e| {
            TokenError::invalid_key(format!(
                "failed to parse private key file at path '{}': {e}",
                path.display()
            ))
        })?;
        Ok(Some(key))
    }

    fn load_encrypted_key(&self, kek: &KeyEncryptionKey) -> Result<Option<Jwk>, TokenError> {
        let enc_path = self.enc_jwk_path();
        if file_exists(&enc_path)? {
            let plain_path = self.jwk_path();
            if file_exists(&plain_path)? {
                warn!(
                    path = %plain_path.display(),
                    "Plaintext private key file left next to the encrypted one; loading the encrypted key"
                );
            }

            let encoded = fs::read_to_string(&enc_path).map_err(|e| {
                TokenError::storage(format!(
                    "failed to read encrypted private key file at path '{}': {e}",
                    enc_path.display()
                ))
            })?;
            let what = format!("private key file at path '{}'", enc_path.display());
            return open_key(kek, &encoded, &what).map(Some);
        }

        let Some(key) = self.load_plain_key()? else {
            return Ok(None);
        };

        // Encrypted copy must be durable before the plaintext goes away.
        self.save_encrypted_key(kek, &key)?;
        let plain_path = self.jwk_path();
        fs::remove_file(&plain_path).map_err(|e| {
            TokenError::storage(format!(
                "failed to remove un-encrypted key file at path '{}': {e}",
                plain_path.display()
            ))
        })?;
        info!(
            kid = key.key_id(),
            path = %enc_path.display(),
            "Migrated private key file to encrypted storage"
        );

        Ok(Some(key))
    }

    fn save_plain_key(&self, key: &Jwk) -> Result<(), TokenError> {
        self.ensure_keys_dir()?;
        let path = self.jwk_path();
        atomic_write_secure(&path, &encode_jwk_bytes(key)?).map_err(|e| {
            TokenError::storage(format!(
                "failed to write key file at path '{}': {e}",
                path.display()
            ))
        })
    }

    fn save_encrypted_key(&self, kek: &KeyEncryptionKey, key: &Jwk) -> Result<(), TokenError> {
        self.ensure_keys_dir()?;
        let encoded = seal_key(kek, key)?;
        let path = self.enc_jwk_path();
        atomic_write_secure(&path, encoded.as_bytes()).map_err(|e| {
            TokenError::storage(format!(
                "failed to write encrypted key file at path '{}': {e}",
                path.display()
            ))
        })
    }

    fn ensure_keys_dir(&self) -> Result<(), TokenError> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.keys_path).map_err(|e| {
            TokenError::storage(format!(
                "failed to create directory '{}' for key file: {e}",
                self.keys_path.display()
            ))
        })
    }
}

#[async_trait]
impl KeyProvider for FileKeyProvider {
    #[instrument(skip(self), fields(path = %self.keys_path.display()))]
    async fn load_key(&self) -> Result<Option<Jwk>, TokenError> {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || provider.load_key_blocking())
            .await
            .map_err(|e| TokenError::internal(format!("key loading task failed: {e}")))?
    }

    #[instrument(skip(self, key), fields(path = %self.keys_path.display()))]
    async fn save_key(&self, key: &Jwk) -> Result<(), TokenError> {
        let provider = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || provider.save_key_blocking(&key))
            .await
            .map_err(|e| TokenError::internal(format!("key saving task failed: {e}")))?
    }

    fn storage(&self) -> KeysStorage {
        KeysStorage::File
    }
}

fn file_exists(path: &Path) -> Result<bool, TokenError> {
    path.try_exists().map_err(|e| {
        TokenError::storage(format!(
            "failed to check if file exists at path '{}': {e}",
            path.display()
        ))
    })
}

/// Write to a sibling temp file, then rename over `path`. Owner-only on unix.
///
/// A stale temp file is removed first so the new one is always created with
/// fresh permissions. The temp file is removed again if anything fails.
fn atomic_write_secure(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    match fs::remove_file(&tmp) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let result = write_new_file(&tmp, data).and_then(|()| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_new_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut f = options.open(path)?;
    f.write_all(data)?;
    f.sync_all()
}
