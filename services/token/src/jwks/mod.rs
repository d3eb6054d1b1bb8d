//! Public key set publishing.

pub mod publisher;

pub use publisher::{Jwks, JwksPublisher};
