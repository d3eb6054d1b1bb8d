//! Symmetric protection of signing keys at rest.
//!
//! [`cipher`] wraps AES-GCM; [`kek`] derives the key-encryption key that the
//! key providers feed into it.

pub mod cipher;
pub mod error;
pub mod kek;

pub use cipher::{decrypt, encrypt, NONCE_SIZE, TAG_SIZE};
pub use error::CryptoError;
pub use kek::{derive_kek, KeyEncryptionKey};
