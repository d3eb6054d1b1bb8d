//! Signing and verification with the active JWK.
//!
//! Signing uses the RustCrypto key types for every algorithm. Verification
//! goes through `jsonwebtoken` for the algorithms it implements and through
//! `p521` for ES512, which it lacks.

use super::key::{EllipticCurve, JwsAlgorithm, Jwk, KeyType};
use crate::error::TokenError;
use crate::jwt::TokenValidationError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{pkcs1v15, BigUint, RsaPrivateKey};
use sha2::{Sha256, Sha384, Sha512};

fn member(value: Option<&String>, name: &str) -> Result<Vec<u8>, TokenError> {
    let value = value.ok_or_else(|| TokenError::invalid_key(format!("key is missing '{name}'")))?;
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| TokenError::invalid_key(format!("key member '{name}' is not base64url: {e}")))
}

fn member_str<'a>(value: Option<&'a String>, name: &str) -> Result<&'a str, TokenError> {
    value
        .map(String::as_str)
        .ok_or_else(|| TokenError::invalid_key(format!("key is missing '{name}'")))
}

/// Check that `key` can be used with its declared algorithm and return it.
fn checked_algorithm(key: &Jwk) -> Result<JwsAlgorithm, TokenError> {
    let alg = key.algorithm()?;
    if key.kty != alg.key_type() {
        return Err(TokenError::invalid_key(format!(
            "algorithm {alg} cannot be used with a {:?} key",
            key.kty
        )));
    }
    if let Some(expected) = alg.curve() {
        let actual = key.curve()?;
        if actual != Some(expected) {
            return Err(TokenError::invalid_key(format!(
                "algorithm {alg} requires curve {expected}"
            )));
        }
    }
    Ok(alg)
}

fn rsa_private_key(key: &Jwk) -> Result<RsaPrivateKey, TokenError> {
    let int = |value: Option<&String>, name: &str| member(value, name).map(|b| BigUint::from_bytes_be(&b));
    let private = RsaPrivateKey::from_components(
        int(key.n.as_ref(), "n")?,
        int(key.e.as_ref(), "e")?,
        int(key.d.as_ref(), "d")?,
        vec![int(key.p.as_ref(), "p")?, int(key.q.as_ref(), "q")?],
    )
    .map_err(|e| TokenError::invalid_key(format!("invalid RSA key: {e}")))?;
    private
        .validate()
        .map_err(|e| TokenError::invalid_key(format!("invalid RSA key: {e}")))?;
    Ok(private)
}

fn ensure_public_matches(key: &Jwk, x: &[u8], y: Option<&[u8]>) -> Result<(), TokenError> {
    let matches = member(key.x.as_ref(), "x")? == x
        && match y {
            Some(y) => member(key.y.as_ref(), "y")? == y,
            None => true,
        };
    if matches {
        Ok(())
    } else {
        Err(TokenError::invalid_key(
            "public key members do not match the private key",
        ))
    }
}

macro_rules! ec_signing_key {
    ($curve:ident, $key:expr) => {{
        let d = member($key.d.as_ref(), "d")?;
        let secret = $curve::SecretKey::from_slice(&d)
            .map_err(|e| TokenError::invalid_key(format!("invalid EC private key: {e}")))?;
        let point = secret.public_key().to_encoded_point(false);
        match (point.x(), point.y()) {
            (Some(x), Some(y)) => ensure_public_matches($key, x.as_slice(), Some(y.as_slice()))?,
            _ => return Err(TokenError::invalid_key("EC public key is the identity")),
        }
        $curve::ecdsa::SigningKey::from_slice(&d)
            .map_err(|e| TokenError::invalid_key(format!("invalid EC private key: {e}")))?
    }};
}

/// Private key ready to produce JWS signatures.
pub enum KeySigner {
    /// RSA PKCS#1 v1.5 with SHA-256
    Rs256(pkcs1v15::SigningKey<Sha256>),
    /// RSA PKCS#1 v1.5 with SHA-384
    Rs384(pkcs1v15::SigningKey<Sha384>),
    /// RSA PKCS#1 v1.5 with SHA-512
    Rs512(pkcs1v15::SigningKey<Sha512>),
    /// ECDSA P-256
    Es256(p256::ecdsa::SigningKey),
    /// ECDSA P-384
    Es384(p384::ecdsa::SigningKey),
    /// ECDSA P-521
    Es512(p521::ecdsa::SigningKey),
    /// Ed25519
    EdDsa(ed25519_dalek::SigningKey),
}

impl KeySigner {
    /// Build a signer from a private JWK with a supported `alg`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is public-only, its algorithm is missing
    /// or unsupported, or its members are inconsistent.
    pub fn from_jwk(key: &Jwk) -> Result<Self, TokenError> {
        if !key.is_private() {
            return Err(TokenError::invalid_key("key object is not a private key"));
        }

        let signer = match checked_algorithm(key)? {
            JwsAlgorithm::RS256 => Self::Rs256(pkcs1v15::SigningKey::new(rsa_private_key(key)?)),
            JwsAlgorithm::RS384 => Self::Rs384(pkcs1v15::SigningKey::new(rsa_private_key(key)?)),
            JwsAlgorithm::RS512 => Self::Rs512(pkcs1v15::SigningKey::new(rsa_private_key(key)?)),
            JwsAlgorithm::ES256 => Self::Es256(ec_signing_key!(p256, key)),
            JwsAlgorithm::ES384 => Self::Es384(ec_signing_key!(p384, key)),
            JwsAlgorithm::ES512 => Self::Es512(ec_signing_key!(p521, key)),
            JwsAlgorithm::EdDSA => {
                let seed: [u8; 32] = member(key.d.as_ref(), "d")?
                    .try_into()
                    .map_err(|_| TokenError::invalid_key("Ed25519 private key must be 32 bytes"))?;
                let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
                ensure_public_matches(key, signing.verifying_key().as_bytes(), None)?;
                Self::EdDsa(signing)
            }
        };
        Ok(signer)
    }

    /// Algorithm this signer produces.
    #[must_use]
    pub const fn algorithm(&self) -> JwsAlgorithm {
        match self {
            Self::Rs256(_) => JwsAlgorithm::RS256,
            Self::Rs384(_) => JwsAlgorithm::RS384,
            Self::Rs512(_) => JwsAlgorithm::RS512,
            Self::Es256(_) => JwsAlgorithm::ES256,
            Self::Es384(_) => JwsAlgorithm::ES384,
            Self::Es512(_) => JwsAlgorithm::ES512,
            Self::EdDsa(_) => JwsAlgorithm::EdDSA,
        }
    }

    /// Sign `message`. ECDSA signatures use the fixed-width `r || s` form.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying signer fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, TokenError> {
        let failed = |e: rsa::signature::Error| TokenError::internal(format!("failed to sign token: {e}"));
        let bytes = match self {
            Self::Rs256(k) => Signer::<pkcs1v15::Signature>::try_sign(k, message).map_err(failed)?.to_vec(),
            Self::Rs384(k) => Signer::<pkcs1v15::Signature>::try_sign(k, message).map_err(failed)?.to_vec(),
            Self::Rs512(k) => Signer::<pkcs1v15::Signature>::try_sign(k, message).map_err(failed)?.to_vec(),
            Self::Es256(k) => Signer::<p256::ecdsa::Signature>::try_sign(k, message)
                .map_err(failed)?
                .to_bytes()
                .to_vec(),
            Self::Es384(k) => Signer::<p384::ecdsa::Signature>::try_sign(k, message)
                .map_err(failed)?
                .to_bytes()
                .to_vec(),
            Self::Es512(k) => Signer::<p521::ecdsa::Signature>::try_sign(k, message)
                .map_err(failed)?
                .to_bytes()
                .to_vec(),
            Self::EdDsa(k) => Signer::<ed25519_dalek::Signature>::try_sign(k, message)
                .map_err(failed)?
                .to_bytes()
                .to_vec(),
        };
        Ok(bytes)
    }
}

enum Verification {
    Jwt(DecodingKey, Algorithm),
    Es512(p521::ecdsa::VerifyingKey),
}

/// Public key ready to check JWS signatures.
pub struct KeyVerifier {
    algorithm: JwsAlgorithm,
    inner: Verification,
}

impl KeyVerifier {
    /// Build a verifier from the public members of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm is unsupported or public members
    /// are missing or malformed.
    pub fn from_jwk(key: &Jwk) -> Result<Self, TokenError> {
        let algorithm = checked_algorithm(key)?;
        let x = || member_str(key.x.as_ref(), "x");
        let inner = match algorithm {
            JwsAlgorithm::RS256 | JwsAlgorithm::RS384 | JwsAlgorithm::RS512 => {
                let decoding = DecodingKey::from_rsa_components(
                    member_str(key.n.as_ref(), "n")?,
                    member_str(key.e.as_ref(), "e")?,
                )?;
                let alg = match algorithm {
                    JwsAlgorithm::RS384 => Algorithm::RS384,
                    JwsAlgorithm::RS512 => Algorithm::RS512,
                    _ => Algorithm::RS256,
                };
                Verification::Jwt(decoding, alg)
            }
            JwsAlgorithm::ES256 | JwsAlgorithm::ES384 => {
                let decoding =
                    DecodingKey::from_ec_components(x()?, member_str(key.y.as_ref(), "y")?)?;
                let alg = if algorithm == JwsAlgorithm::ES384 {
                    Algorithm::ES384
                } else {
                    Algorithm::ES256
                };
                Verification::Jwt(decoding, alg)
            }
            JwsAlgorithm::EdDSA => Verification::Jwt(DecodingKey::from_ed_components(x()?)?, Algorithm::EdDSA),
            JwsAlgorithm::ES512 => {
                let mut sec1 = vec![0x04];
                sec1.extend(member(key.x.as_ref(), "x")?);
                sec1.extend(member(key.y.as_ref(), "y")?);
                let verifying = p521::ecdsa::VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| {
                    TokenError::invalid_key(format!("invalid {} public key: {e}", EllipticCurve::P521))
                })?;
                Verification::Es512(verifying)
            }
        };
        Ok(Self { algorithm, inner })
    }

    /// Algorithm this verifier accepts.
    #[must_use]
    pub const fn algorithm(&self) -> JwsAlgorithm {
        self.algorithm
    }

    /// Check a base64url `signature` over `message`.
    ///
    /// # Errors
    ///
    /// [`TokenValidationError::BadSignature`] for any malformed or
    /// non-matching signature.
    pub fn verify(&self, message: &[u8], signature: &str) -> Result<(), TokenValidationError> {
        let valid = match &self.inner {
            Verification::Jwt(key, alg) => {
                jsonwebtoken::crypto::verify(signature, message, key, *alg).unwrap_or(false)
            }
            Verification::Es512(key) => URL_SAFE_NO_PAD
                .decode(signature)
                .ok()
                .and_then(|raw| p521::ecdsa::Signature::from_slice(&raw).ok())
                .is_some_and(|sig| key.verify(message, &sig).is_ok()),
        };
        if valid {
            Ok(())
        } else {
            Err(TokenValidationError::BadSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::generate_key;

    fn sign_and_verify(alg: &str, crv: &str) {
        let key = generate_key(alg, crv).unwrap();
        let signer = KeySigner::from_jwk(&key).unwrap();
        let verifier = KeyVerifier::from_jwk(&key.to_public()).unwrap();
        assert_eq!(signer.algorithm().as_str(), alg);
        assert_eq!(verifier.algorithm().as_str(), alg);

        let sig = URL_SAFE_NO_PAD.encode(signer.sign(b"header.payload").unwrap());
        verifier.verify(b"header.payload", &sig).unwrap();
        assert_eq!(
            verifier.verify(b"header.payload2", &sig),
            Err(TokenValidationError::BadSignature)
        );
        assert_eq!(
            verifier.verify(b"header.payload", "not base64!"),
            Err(TokenValidationError::BadSignature)
        );
    }

    #[test]
    fn test_rs256() {
        sign_and_verify("RS256", "");
    }

    #[test]
    fn test_ecdsa() {
        sign_and_verify("ES256", "");
        sign_and_verify("ES384", "");
        sign_and_verify("ES512", "");
    }

    #[test]
    fn test_eddsa() {
        sign_and_verify("EdDSA", "Ed25519");
    }

    #[test]
    fn test_ecdsa_signature_width() {
        for (alg, width) in [("ES256", 64), ("ES384", 96), ("ES512", 132)] {
            let key = generate_key(alg, "").unwrap();
            let sig = KeySigner::from_jwk(&key).unwrap().sign(b"m").unwrap();
            assert_eq!(sig.len(), width, "{alg}");
        }
    }

    #[test]
    fn test_rejects_public_key() {
        let key = generate_key("ES256", "").unwrap();
        assert!(matches!(
            KeySigner::from_jwk(&key.to_public()),
            Err(TokenError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_rejects_alg_curve_mismatch() {
        let mut key = generate_key("ES384", "").unwrap();
        key.alg = Some("ES256".to_string());
        assert!(KeySigner::from_jwk(&key).is_err());
        assert!(KeyVerifier::from_jwk(&key).is_err());

        let mut rsa_as_ec = generate_key("ES256", "").unwrap();
        rsa_as_ec.alg = Some("RS256".to_string());
        assert!(KeySigner::from_jwk(&rsa_as_ec).is_err());
    }

    #[test]
    fn test_rejects_mismatched_public_members() {
        let mut key = generate_key("ES256", "").unwrap();
        let other = generate_key("ES256", "").unwrap();
        key.x = other.x;
        assert!(KeySigner::from_jwk(&key).is_err());

        let mut ed = generate_key("EdDSA", "Ed25519").unwrap();
        ed.x = generate_key("EdDSA", "Ed25519").unwrap().x;
        assert!(KeySigner::from_jwk(&ed).is_err());
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        let a = generate_key("ES256", "").unwrap();
        let b = generate_key("ES256", "").unwrap();
        let sig = URL_SAFE_NO_PAD.encode(KeySigner::from_jwk(&a).unwrap().sign(b"m").unwrap());
        assert!(KeyVerifier::from_jwk(&b).unwrap().verify(b"m", &sig).is_err());
    }
}
