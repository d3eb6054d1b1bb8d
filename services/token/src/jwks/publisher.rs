//! JWKS document served to relying parties.

use crate::error::TokenError;
use crate::jwk::{ensure_alg_in_key, Jwk};
use serde::{Deserialize, Serialize};

/// JSON Web Key Set document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// Published keys
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Empty set.
    #[must_use]
    pub const fn new() -> Self {
        Jwks { keys: Vec::new() }
    }

    /// Append a key.
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// Compact JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, TokenError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Publishes the public half of the active signing key.
///
/// The set holds exactly one key and is encoded once, at construction;
/// the key never changes for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct JwksPublisher {
    public_key: Jwk,
    encoded: String,
}

impl JwksPublisher {
    /// Build the published set from the active private (or public) key.
    ///
    /// # Errors
    ///
    /// Returns an error if the set cannot be encoded.
    pub fn new(key: &Jwk) -> Result<Self, TokenError> {
        let mut public_key = key.to_public();
        ensure_alg_in_key(&mut public_key, None, None);

        let mut jwks = Jwks::new();
        jwks.add_key(public_key.clone());
        let encoded = jwks.to_json()?;

        Ok(JwksPublisher {
            public_key,
            encoded,
        })
    }

    /// The published public key.
    #[must_use]
    pub const fn public_key(&self) -> &Jwk {
        &self.public_key
    }

    /// Cached JSON encoding of the set.
    pub fn as_json(&self) -> &str {
        &self.encoded
    }

    /// `kid` of the published key.
    #[must_use]
    pub fn current_key_id(&self) -> Option<&str> {
        self.public_key.kid.as_deref()
    }
}
