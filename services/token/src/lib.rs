//! Token Service library.
//!
//! Provides signing key generation, at-rest key encryption, file and
//! database key storage, JWT issuance/verification for the four token
//! kinds, and JWKS publishing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod jwk;
pub mod jwks;
pub mod jwt;
pub mod keys;
pub mod model;
pub mod rotate;
pub mod service;

// Re-exports for convenience
pub use config::{Config, KeysConfig, KeysStorage};
pub use error::TokenError;
pub use jwk::{generate_key, JwsAlgorithm, Jwk};
pub use jwt::{Claims, TokenType, TokenValidationError};
pub use keys::{get_key_provider, KeyProvider};
pub use model::User;
pub use service::{get_is_admin, TokenService};
