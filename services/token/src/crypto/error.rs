//! Error types for the symmetric crypto primitives.

use thiserror::Error;

/// Errors from the cipher and KEK derivation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AES keys must be 16, 24 or 32 bytes.
    #[error("invalid AES key size: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeySize(usize),

    /// Any decryption failure. Deliberately carries no detail.
    #[error("failed to decrypt data")]
    Decrypt,

    /// Encryption failed (RNG or AEAD failure).
    #[error("failed to encrypt data: {0}")]
    Encrypt(String),

    /// No operator secret was supplied, so there is nothing to derive.
    #[error("no encryption key configured")]
    NoEncryptionKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_error_has_no_detail() {
        assert_eq!(CryptoError::Decrypt.to_string(), "failed to decrypt data");
    }

    #[test]
    fn test_key_size_display() {
        assert_eq!(
            CryptoError::InvalidKeySize(7).to_string(),
            "invalid AES key size: 7 bytes (expected 16, 24 or 32)"
        );
    }
}
