//! Key material generation.
//!
//! `generate_key` dispatches on the requested algorithm into the concrete
//! RSA, ECDSA or Ed25519 constructor, then stamps the result with a fresh
//! key ID, the signing usage and its algorithm metadata.

use super::key::{EllipticCurve, JwsAlgorithm, Jwk, KeyType};
use super::KEY_USAGE_SIGNING;
use crate::error::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use tracing::debug;

/// Random bytes in a generated key ID.
pub const KEY_ID_BYTES: usize = 8;

/// Generate a new signing key for `alg`.
///
/// `crv` is only consulted for `EdDSA`, where it must be `Ed25519`.
///
/// # Errors
///
/// [`TokenError::UnsupportedAlgorithm`] / [`TokenError::UnsupportedCurve`]
/// for unknown inputs, [`TokenError::KeyGeneration`] if the RNG fails.
pub fn generate_key(alg: &str, crv: &str) -> Result<Jwk, TokenError> {
    let algorithm: JwsAlgorithm = alg.parse()?;
    let curve = match algorithm {
        JwsAlgorithm::EdDSA => match crv {
            "Ed25519" => Some(EllipticCurve::Ed25519),
            other => return Err(TokenError::UnsupportedCurve(other.to_string())),
        },
        _ => None,
    };

    let mut key = generate_raw_key(algorithm)?;
    key.kid = Some(generate_key_id()?);
    key.key_use = Some(KEY_USAGE_SIGNING.to_string());
    ensure_alg_in_key(&mut key, Some(algorithm), curve);

    debug!(alg = %algorithm, kid = key.key_id(), "Generated signing key");
    Ok(key)
}

/// Random key ID: base64url of [`KEY_ID_BYTES`] random bytes.
///
/// # Errors
///
/// Returns an error if the OS RNG fails.
pub fn generate_key_id() -> Result<String, TokenError> {
    let mut buf = [0u8; KEY_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| TokenError::KeyGeneration(format!("failed to read random bytes: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

/// Fill in `alg` (and `crv` where the key type has one) if the key lacks it.
///
/// An explicit `alg` wins. Otherwise RSA keys default to RS256, OKP keys to
/// EdDSA on Ed25519, and EC keys to the algorithm matching their curve
/// (ES256 on P-256 when the curve is missing).
pub fn ensure_alg_in_key(key: &mut Jwk, alg: Option<JwsAlgorithm>, crv: Option<EllipticCurve>) {
    if key.alg.is_some() {
        return;
    }

    if let Some(alg) = alg {
        key.alg = Some(alg.as_str().to_string());
        if let Some(crv) = crv {
            if matches!(key.kty, KeyType::Ec | KeyType::Okp) {
                key.crv = Some(crv.as_str().to_string());
            }
        }
        return;
    }

    let (alg, crv) = match key.kty {
        KeyType::Rsa => (JwsAlgorithm::RS256, None),
        KeyType::Ec => {
            let curve = match key.curve() {
                Ok(Some(c)) if c != EllipticCurve::Ed25519 => c,
                _ => EllipticCurve::P256,
            };
            (curve.default_algorithm(), Some(curve))
        }
        KeyType::Okp => (JwsAlgorithm::EdDSA, Some(EllipticCurve::Ed25519)),
    };
    key.alg = Some(alg.as_str().to_string());
    if let Some(crv) = crv {
        key.crv.get_or_insert_with(|| crv.as_str().to_string());
    }
}

fn generate_raw_key(algorithm: JwsAlgorithm) -> Result<Jwk, TokenError> {
    match algorithm {
        JwsAlgorithm::RS256 | JwsAlgorithm::RS384 | JwsAlgorithm::RS512 => {
            let bits = algorithm.rsa_bits().unwrap_or(2048);
            let key = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| {
                TokenError::KeyGeneration(format!("failed to generate RSA-{bits} key: {e}"))
            })?;
            rsa_to_jwk(&key)
        }
        JwsAlgorithm::ES256 => {
            let secret = p256::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            ec_to_jwk(EllipticCurve::P256, &secret.to_bytes(), point.x(), point.y())
        }
        JwsAlgorithm::ES384 => {
            let secret = p384::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            ec_to_jwk(EllipticCurve::P384, &secret.to_bytes(), point.x(), point.y())
        }
        JwsAlgorithm::ES512 => {
            let secret = p521::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            ec_to_jwk(EllipticCurve::P521, &secret.to_bytes(), point.x(), point.y())
        }
        JwsAlgorithm::EdDSA => {
            let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
            Ok(Jwk {
                crv: Some(EllipticCurve::Ed25519.as_str().to_string()),
                d: Some(URL_SAFE_NO_PAD.encode(signing.to_bytes())),
                x: Some(URL_SAFE_NO_PAD.encode(signing.verifying_key().to_bytes())),
                ..Jwk::new(KeyType::Okp)
            })
        }
    }
}

fn rsa_to_jwk(key: &RsaPrivateKey) -> Result<Jwk, TokenError> {
    let [p, q] = key.primes() else {
        return Err(TokenError::KeyGeneration(
            "multi-prime RSA keys are not supported".to_string(),
        ));
    };
    let missing = || TokenError::KeyGeneration("RSA key is missing CRT values".to_string());
    let dp = key.dp().ok_or_else(missing)?;
    let dq = key.dq().ok_or_else(missing)?;
    let qi = key.crt_coefficient().ok_or_else(missing)?;

    let b64 = |v: &rsa::BigUint| Some(URL_SAFE_NO_PAD.encode(v.to_bytes_be()));
    Ok(Jwk {
        n: b64(key.n()),
        e: b64(key.e()),
        d: b64(key.d()),
        p: b64(p),
        q: b64(q),
        dp: b64(dp),
        dq: b64(dq),
        qi: b64(&qi),
        ..Jwk::new(KeyType::Rsa)
    })
}

fn ec_to_jwk<X, Y>(
    curve: EllipticCurve,
    d: &[u8],
    x: Option<&X>,
    y: Option<&Y>,
) -> Result<Jwk, TokenError>
where
    X: AsRef<[u8]> + ?Sized,
    Y: AsRef<[u8]> + ?Sized,
{
    let (Some(x), Some(y)) = (x, y) else {
        return Err(TokenError::KeyGeneration(format!(
            "{curve} public key has no affine coordinates"
        )));
    };
    Ok(Jwk {
        crv: Some(curve.as_str().to_string()),
        d: Some(URL_SAFE_NO_PAD.encode(d)),
        x: Some(URL_SAFE_NO_PAD.encode(x.as_ref())),
        y: Some(URL_SAFE_NO_PAD.encode(y.as_ref())),
        ..Jwk::new(KeyType::Ec)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded_len(value: Option<&String>) -> usize {
        URL_SAFE_NO_PAD.decode(value.unwrap()).unwrap().len()
    }

    #[test]
    fn test_generate_ec_keys() {
        for (alg, crv, coord_len) in [
            ("ES256", "P-256", 32),
            ("ES384", "P-384", 48),
            ("ES512", "P-521", 66),
        ] {
            let key = generate_key(alg, "").unwrap();
            assert_eq!(key.kty, KeyType::Ec);
            assert_eq!(key.alg.as_deref(), Some(alg));
            assert_eq!(key.crv.as_deref(), Some(crv));
            assert_eq!(key.key_use.as_deref(), Some("sig"));
            assert_eq!(decoded_len(key.x.as_ref()), coord_len);
            assert_eq!(decoded_len(key.y.as_ref()), coord_len);
            assert!(key.is_private());
        }
    }

    #[test]
    fn test_generate_rsa_2048() {
        let key = generate_key("RS256", "").unwrap();
        assert_eq!(key.kty, KeyType::Rsa);
        assert_eq!(key.alg.as_deref(), Some("RS256"));
        assert_eq!(key.crv, None);
        assert_eq!(decoded_len(key.n.as_ref()), 256);
        assert_eq!(key.e.as_deref(), Some("AQAB"));
        assert!(key.is_private());
        assert!(key.qi.is_some());
    }

    #[test]
    fn test_generate_ed25519() {
        let key = generate_key("EdDSA", "Ed25519").unwrap();
        assert_eq!(key.kty, KeyType::Okp);
        assert_eq!(key.alg.as_deref(), Some("EdDSA"));
        assert_eq!(key.crv.as_deref(), Some("Ed25519"));
        assert_eq!(decoded_len(key.x.as_ref()), 32);
        assert_eq!(decoded_len(key.d.as_ref()), 32);
    }

    #[test]
    fn test_unsupported_inputs() {
        assert!(matches!(
            generate_key("HS256", ""),
            Err(TokenError::UnsupportedAlgorithm(a)) if a == "HS256"
        ));
        assert!(matches!(
            generate_key("", ""),
            Err(TokenError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            generate_key("EdDSA", "X25519"),
            Err(TokenError::UnsupportedCurve(c)) if c == "X25519"
        ));
        assert!(matches!(
            generate_key("EdDSA", ""),
            Err(TokenError::UnsupportedCurve(_))
        ));
    }

    #[test]
    fn test_key_ids_are_random() {
        let a = generate_key_id().unwrap();
        let b = generate_key_id().unwrap();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), KEY_ID_BYTES);
        assert!(!a.contains(['+', '/', '=']));
    }

    #[test]
    fn test_ensure_alg_defaults() {
        let mut rsa = Jwk::new(KeyType::Rsa);
        ensure_alg_in_key(&mut rsa, None, None);
        assert_eq!(rsa.alg.as_deref(), Some("RS256"));
        assert_eq!(rsa.crv, None);

        let mut ec = Jwk::new(KeyType::Ec);
        ensure_alg_in_key(&mut ec, None, None);
        assert_eq!(ec.alg.as_deref(), Some("ES256"));
        assert_eq!(ec.crv.as_deref(), Some("P-256"));

        let mut okp = Jwk::new(KeyType::Okp);
        ensure_alg_in_key(&mut okp, None, None);
        assert_eq!(okp.alg.as_deref(), Some("EdDSA"));
        assert_eq!(okp.crv.as_deref(), Some("Ed25519"));
    }

    #[test]
    fn test_ensure_alg_follows_ec_curve() {
        let mut key = Jwk {
            crv: Some("P-521".to_string()),
            ..Jwk::new(KeyType::Ec)
        };
        ensure_alg_in_key(&mut key, None, None);
        assert_eq!(key.alg.as_deref(), Some("ES512"));
        assert_eq!(key.crv.as_deref(), Some("P-521"));
    }

    #[test]
    fn test_ensure_alg_keeps_existing() {
        let mut key = Jwk {
            alg: Some("ES384".to_string()),
            crv: Some("P-384".to_string()),
            ..Jwk::new(KeyType::Ec)
        };
        ensure_alg_in_key(&mut key, Some(JwsAlgorithm::ES256), Some(EllipticCurve::P256));
        assert_eq!(key.alg.as_deref(), Some("ES384"));
        assert_eq!(key.crv.as_deref(), Some("P-384"));
    }

    #[test]
    fn test_ensure_alg_explicit() {
        let mut key = Jwk::new(KeyType::Okp);
        ensure_alg_in_key(&mut key, Some(JwsAlgorithm::EdDSA), Some(EllipticCurve::Ed25519));
        assert_eq!(key.alg.as_deref(), Some("EdDSA"));
        assert_eq!(key.crv.as_deref(), Some("Ed25519"));

        let mut rsa = Jwk::new(KeyType::Rsa);
        ensure_alg_in_key(&mut rsa, Some(JwsAlgorithm::RS384), Some(EllipticCurve::P256));
        assert_eq!(rsa.alg.as_deref(), Some("RS384"));
        assert_eq!(rsa.crv, None);
    }
}
