//! AES-GCM encryption with a random nonce prefixed to the ciphertext.
//!
//! Output layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! Every call draws a fresh nonce, so encrypting the same plaintext twice
//! yields different output. Do not encrypt more than ~2^32 messages under
//! one key.

use super::error::CryptoError;
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use rand::RngCore;

/// GCM standard nonce size.
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AES-GCM keyed with a 128, 192 or 256-bit key.
enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidKeySize(key.len());
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256Gcm::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            len => Err(CryptoError::InvalidKeySize(len)),
        }
    }

    fn seal(&self, nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.encrypt(nonce, payload),
            Self::Aes192(c) => c.encrypt(nonce, payload),
            Self::Aes256(c) => c.encrypt(nonce, payload),
        }
    }

    fn open(&self, nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.decrypt(nonce, payload),
            Self::Aes192(c) => c.decrypt(nonce, payload),
            Self::Aes256(c) => c.decrypt(nonce, payload),
        }
    }
}

/// Encrypt `plaintext`, authenticating `associated_data` alongside it.
///
/// # Errors
///
/// [`CryptoError::InvalidKeySize`] unless `key` is 16, 24 or 32 bytes.
pub fn encrypt(key: &[u8], plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Cipher::new(key)?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng()
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CryptoError::Encrypt(format!("failed to generate random nonce: {e}")))?;

    let sealed = cipher
        .seal(
            &nonce,
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt output of [`encrypt`].
///
/// # Errors
///
/// [`CryptoError::InvalidKeySize`] for a bad key length; otherwise every
/// failure (short input, wrong key, tampering, mismatched associated data)
/// is the same [`CryptoError::Decrypt`].
pub fn decrypt(key: &[u8], ciphertext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Cipher::new(key)?;

    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Decrypt);
    }

    let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
    cipher
        .open(
            nonce,
            Payload {
                msg: sealed,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::Decrypt)
}
