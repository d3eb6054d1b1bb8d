//! Error type for the token service.
//!
//! Every fallible operation in the crate returns [`TokenError`]. Only
//! [`TokenError::Validation`] is expected at runtime; the rest stop startup.

use crate::crypto::CryptoError;
use crate::jwt::TokenValidationError;
use crate::keys::StoreError;
use thiserror::Error;

/// Token service error.
#[derive(Error, Debug)]
pub enum TokenError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested signing algorithm is not supported
    #[error("Unsupported key algorithm '{0}'; supported values: RS256, RS384, RS512, ES256, ES384, ES512, EdDSA")]
    UnsupportedAlgorithm(String),

    /// Requested EdDSA curve is not supported
    #[error("Unsupported curve '{0}' for EdDSA; supported values: Ed25519")]
    UnsupportedCurve(String),

    /// Key is malformed, public-only or unusable for signing
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key pair generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Decryption failures keep their source opaque.
    #[error("{context}: {source}")]
    Crypto {
        /// What was being decrypted
        context: String,
        /// Underlying failure
        #[source]
        source: CryptoError,
    },

    /// Key file could not be read or written
    #[error("Key storage error: {0}")]
    Storage(String),

    /// Key-value store failure
    #[error("Key store error: {0}")]
    Store(#[from] StoreError),

    /// Token failed verification
    #[error("Invalid token: {0}")]
    Validation(#[from] TokenValidationError),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unexpected failure, such as a panicked blocking task
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TokenError {
    /// Configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Storage error with a message.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Invalid key error with a message.
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Internal error with a message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Crypto failure with context.
    pub fn crypto(context: impl Into<String>, source: CryptoError) -> Self {
        Self::Crypto {
            context: context.into(),
            source,
        }
    }

    /// Errors that must stop startup. Only token validation failures are
    /// recoverable; callers map those to an unauthenticated response.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }

    /// Code handed to API clients. Validation failures all collapse into one
    /// code so a client cannot learn which check failed.
    #[must_use]
    pub const fn client_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => TOKEN_INVALID,
            _ => TOKEN_INTERNAL_ERROR,
        }
    }
}

impl From<serde_json::Error> for TokenError {
    fn from(err: serde_json::Error) -> Self {
        TokenError::Serialization(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        TokenError::InvalidKey(err.to_string())
    }
}

/// Client code for any token validation failure.
pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
/// Client code for every other failure.
pub const TOKEN_INTERNAL_ERROR: &str = "TOKEN_INTERNAL_ERROR";
