//! Operator-triggered signing key rotation.
//!
//! Rotation runs offline from the CLI. It writes a new key through the
//! configured provider; a running server keeps its in-memory key until it is
//! restarted.

use crate::error::TokenError;
use crate::jwk::{generate_key, EllipticCurve, JwsAlgorithm, Jwk};
use crate::keys::KeyProvider;
use std::io::{self, BufRead, Write};
use tracing::{info, instrument};

/// Shown before asking for confirmation.
pub const ROTATION_WARNING: &str = "WARNING: Rotating the private key will invalidate all existing tokens. \
Both latchkey and all client applications will likely need to be restarted.";

/// Shown after a successful rotation.
pub const RESTART_NOTICE: &str =
    "Note: if latchkey is running, you will need to restart it for the new key to be loaded";

/// Validate and normalize case of the operator's `--alg`/`--crv` flags.
///
/// The curve is only read for EdDSA, where it is required.
///
/// # Errors
///
/// Returns an error for an empty or unsupported algorithm, or an EdDSA
/// request without a supported curve.
pub fn normalize_algorithm(
    alg: &str,
    crv: &str,
) -> Result<(JwsAlgorithm, Option<EllipticCurve>), TokenError> {
    if alg.is_empty() {
        return Err(TokenError::config("key algorithm is required"));
    }

    let algorithm = JwsAlgorithm::ALL
        .into_iter()
        .find(|a| a.as_str().eq_ignore_ascii_case(alg))
        .ok_or_else(|| TokenError::UnsupportedAlgorithm(alg.to_string()))?;

    if algorithm != JwsAlgorithm::EdDSA {
        return Ok((algorithm, None));
    }

    if crv.is_empty() {
        return Err(TokenError::config(
            "a curve name is required when algorithm is EdDSA",
        ));
    }
    if !crv.eq_ignore_ascii_case(EllipticCurve::Ed25519.as_str()) {
        return Err(TokenError::UnsupportedCurve(crv.to_string()));
    }
    Ok((algorithm, Some(EllipticCurve::Ed25519)))
}

/// Ask a yes/no question; anything but `y`/`yes` is a no.
///
/// # Errors
///
/// Returns an error if writing the prompt or reading the answer fails.
pub fn confirm<R: BufRead, W: Write>(mut input: R, mut output: W, prompt: &str) -> io::Result<bool> {
    write!(output, "{prompt} [y/N]: ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

/// Generate a new key and overwrite the stored one.
///
/// # Errors
///
/// Returns an error if generation or persistence fails.
#[instrument(skip(provider), fields(storage = %provider.storage()))]
pub async fn rotate_key(
    provider: &dyn KeyProvider,
    algorithm: JwsAlgorithm,
    curve: Option<EllipticCurve>,
) -> Result<Jwk, TokenError> {
    let crv = curve.map_or("", |c| c.as_str());
    let key = generate_key(algorithm.as_str(), crv)?;
    provider.replace_key(&key).await?;

    info!(kid = key.key_id(), alg = %algorithm, "Signing key rotated");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_kek;
    use crate::keys::{DatabaseKeyProvider, FileKeyProvider, MemoryKvStore};
    use std::sync::Arc;

    #[test]
    fn test_normalize_algorithm_case() {
        assert_eq!(
            normalize_algorithm("es384", "").unwrap(),
            (JwsAlgorithm::ES384, None)
        );
        assert_eq!(
            normalize_algorithm("rs256", "ignored").unwrap(),
            (JwsAlgorithm::RS256, None)
        );
        assert_eq!(
            normalize_algorithm("EDDSA", "ed25519").unwrap(),
            (JwsAlgorithm::EdDSA, Some(EllipticCurve::Ed25519))
        );
    }

    #[test]
    fn test_normalize_algorithm_errors() {
        assert!(matches!(
            normalize_algorithm("", ""),
            Err(TokenError::Config(msg)) if msg.contains("algorithm is required")
        ));
        assert!(matches!(
            normalize_algorithm("INVALID", ""),
            Err(TokenError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            normalize_algorithm("EdDSA", ""),
            Err(TokenError::Config(msg)) if msg.contains("curve name is required")
        ));
        assert!(matches!(
            normalize_algorithm("EdDSA", "X448"),
            Err(TokenError::UnsupportedCurve(_))
        ));
    }

    #[test]
    fn test_confirm() {
        for (answer, expected) in [
            ("y\n", true),
            ("YES\n", true),
            ("n\n", false),
            ("\n", false),
            ("", false),
        ] {
            let mut output = Vec::new();
            assert_eq!(confirm(answer.as_bytes(), &mut output, "Confirm").unwrap(), expected);
            assert_eq!(String::from_utf8(output).unwrap(), "Confirm [y/N]: ");
        }
    }

    #[tokio::test]
    async fn test_rotate_file_key() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileKeyProvider::new(dir.path(), None);

        let first = rotate_key(&provider, JwsAlgorithm::ES256, None).await.unwrap();
        let second = rotate_key(&provider, JwsAlgorithm::EdDSA, Some(EllipticCurve::Ed25519))
            .await
            .unwrap();
        assert_ne!(first.key_id(), second.key_id());

        let loaded = provider.load_key().await.unwrap().unwrap();
        assert_eq!(loaded.key_id(), second.key_id());
        assert_eq!(loaded.alg.as_deref(), Some("EdDSA"));
    }

    #[tokio::test]
    async fn test_rotate_database_key_overwrites() {
        let kek = derive_kek(b"test-encryption-key-characters-long", "instance").unwrap();
        let provider = DatabaseKeyProvider::new(Arc::new(MemoryKvStore::new()), Some(kek)).unwrap();

        provider
            .save_key(&generate_key("ES256", "").unwrap())
            .await
            .unwrap();
        let rotated = rotate_key(&provider, JwsAlgorithm::ES384, None).await.unwrap();

        let loaded = provider.load_key().await.unwrap().unwrap();
        assert_eq!(loaded.key_id(), rotated.key_id());
        assert_eq!(loaded.alg.as_deref(), Some("ES384"));
    }
}
