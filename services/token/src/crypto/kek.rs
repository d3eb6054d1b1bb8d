//! Key-encryption-key derivation.
//!
//! `KEK = HMAC-SHA3-256(key = operator secret, msg = "latchkey/<instance id>/jwk-kek")`.
//! Binding the instance ID into the message means a secret shared between
//! two deployments still yields two unrelated KEKs.

use super::error::CryptoError;
use hmac::{Hmac, Mac};
use sha3::Sha3_256;
use std::fmt;
use zeroize::Zeroizing;

/// Product name used as the derivation prefix.
pub const APP_NAME: &str = "latchkey";

/// KEK length in bytes (AES-256).
pub const KEK_SIZE: usize = 32;

type HmacSha3_256 = Hmac<Sha3_256>;

/// Derived 256-bit key-encryption key. Held in memory only; zeroed on drop.
#[derive(Clone)]
pub struct KeyEncryptionKey(Zeroizing<[u8; KEK_SIZE]>);

impl KeyEncryptionKey {
    /// Raw key bytes, for handing to the cipher.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyEncryptionKey([REDACTED])")
    }
}

/// Derive the KEK for this instance.
///
/// # Errors
///
/// [`CryptoError::NoEncryptionKey`] if `operator_secret` is empty.
pub fn derive_kek(operator_secret: &[u8], instance_id: &str) -> Result<KeyEncryptionKey, CryptoError> {
    if operator_secret.is_empty() {
        return Err(CryptoError::NoEncryptionKey);
    }

    let mut mac = <HmacSha3_256 as Mac>::new_from_slice(operator_secret)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
    mac.update(format!("{APP_NAME}/{instance_id}/jwk-kek").as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut kek = Zeroizing::new([0u8; KEK_SIZE]);
    kek.copy_from_slice(&digest);
    Ok(KeyEncryptionKey(kek))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_known_answer() {
        let kek = derive_kek(b"test-encryption-key-characters-long", "8a3f2c10-instance").unwrap();
        assert_eq!(
            hex(kek.as_bytes()),
            "a21768a2b17c70bdf3c82f497cda305018213e31feb6f778c9a41b36225ded73"
        );

        let kek = derive_kek(b"k", "").unwrap();
        assert_eq!(
            hex(kek.as_bytes()),
            "f9c81b8c753b34caaece06d7ddb0f8adf8ee55fcce5bd76694d731fb3de91648"
        );
    }

    #[test]
    fn test_deterministic() {
        let a = derive_kek(b"secret", "instance-a").unwrap();
        let b = derive_kek(b"secret", "instance-a").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), KEK_SIZE);
    }

    #[test]
    fn test_bound_to_instance() {
        let a = derive_kek(b"secret", "instance-a").unwrap();
        let b = derive_kek(b"secret", "instance-b").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_empty_secret() {
        assert_eq!(
            derive_kek(b"", "instance-a").unwrap_err(),
            CryptoError::NoEncryptionKey
        );
    }

    #[test]
    fn test_debug_redacts() {
        let kek = derive_kek(b"secret", "i").unwrap();
        assert_eq!(format!("{kek:?}"), "KeyEncryptionKey([REDACTED])");
    }
}
