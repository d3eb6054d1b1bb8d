//! Signing keys in JSON Web Key form: model, generation and signing.

pub mod generator;
pub mod key;
pub mod signer;

pub use generator::{ensure_alg_in_key, generate_key, generate_key_id};
pub use key::{encode_jwk_bytes, EllipticCurve, JwsAlgorithm, Jwk, KeyType};
pub use signer::{KeySigner, KeyVerifier};

/// Value of the JWK `use` member for signing keys.
pub const KEY_USAGE_SIGNING: &str = "sig";
