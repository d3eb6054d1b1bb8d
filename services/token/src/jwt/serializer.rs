//! Compact JWS serialization.

use crate::error::TokenError;
use crate::jwk::{JwsAlgorithm, Jwk, KeySigner, KeyVerifier};
use crate::jwt::claims::Claims;
use crate::jwt::validator::TokenValidationError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// JWS protected header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    /// Signing algorithm
    pub alg: String,
    /// ID of the signing key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Media type, always `JWT` on issued tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// Compact JWS encoding and signature checking for one key.
pub struct JwtSerializer {
    signer: KeySigner,
    verifier: KeyVerifier,
    key_id: String,
}

impl JwtSerializer {
    /// Serializer signing with the private `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` cannot sign or verify with its algorithm.
    pub fn new(key: &Jwk) -> Result<Self, TokenError> {
        Ok(Self {
            signer: KeySigner::from_jwk(key)?,
            verifier: KeyVerifier::from_jwk(&key.to_public())?,
            key_id: key.key_id().to_string(),
        })
    }

    /// Algorithm used for signing and required when verifying.
    #[must_use]
    pub const fn algorithm(&self) -> JwsAlgorithm {
        self.signer.algorithm()
    }

    /// Sign `claims` into a compact JWS with `alg`, `kid` and `typ` headers.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or signing fails.
    pub fn serialize(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = JwsHeader {
            alg: self.algorithm().as_str().to_string(),
            kid: (!self.key_id.is_empty()).then(|| self.key_id.clone()),
            typ: Some("JWT".to_string()),
        };

        let mut token = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?));

        let signature = self.signer.sign(token.as_bytes())?;
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(signature));
        Ok(token)
    }

    /// Verify the signature and return the claims. Claims are not validated.
    pub fn deserialize(&self, token: &str) -> Result<Claims, TokenValidationError> {
        let parts = split(token)?;
        let header: JwsHeader = decode_part(parts.header, "header")?;

        let expected = self.algorithm().as_str();
        if header.alg != expected {
            return Err(TokenValidationError::AlgorithmMismatch {
                expected: expected.to_string(),
                actual: header.alg,
            });
        }

        self.verifier
            .verify(parts.signing_input.as_bytes(), parts.signature)?;

        decode_part(parts.payload, "payload")
    }

    /// Decode header and claims without checking anything.
    pub fn deserialize_unverified(token: &str) -> Result<(JwsHeader, Claims), TokenValidationError> {
        let parts = split(token)?;
        Ok((
            decode_part(parts.header, "header")?,
            decode_part(parts.payload, "payload")?,
        ))
    }
}

struct Parts<'a> {
    header: &'a str,
    payload: &'a str,
    signing_input: &'a str,
    signature: &'a str,
}

fn split(token: &str) -> Result<Parts<'_>, TokenValidationError> {
    let malformed = || TokenValidationError::Malformed("invalid token format".to_string());
    let (signing_input, signature) = token.rsplit_once('.').ok_or_else(malformed)?;
    let (header, payload) = signing_input.split_once('.').ok_or_else(malformed)?;
    if payload.contains('.') {
        return Err(malformed());
    }
    Ok(Parts {
        header,
        payload,
        signing_input,
        signature,
    })
}

fn decode_part<T: serde::de::DeserializeOwned>(
    part: &str,
    name: &str,
) -> Result<T, TokenValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| TokenValidationError::Malformed(format!("invalid {name} encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TokenValidationError::Malformed(format!("invalid {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::generate_key;
    use crate::jwt::claims::TokenType;

    fn claims() -> Claims {
        Claims::new("https://idp.example", "client-1", TokenType::Id, 1_000, 3_600)
            .with_subject("user-123")
    }

    #[test]
    fn test_round_trip_es256() {
        let key = generate_key("ES256", "").unwrap();
        let serializer = JwtSerializer::new(&key).unwrap();

        let token = serializer.serialize(&claims()).unwrap();
        let decoded = serializer.deserialize(&token).unwrap();
        assert_eq!(decoded, claims());
    }

    #[test]
    fn test_header() {
        let key = generate_key("EdDSA", "Ed25519").unwrap();
        let serializer = JwtSerializer::new(&key).unwrap();
        let token = serializer.serialize(&claims()).unwrap();

        let (header, decoded) = JwtSerializer::deserialize_unverified(&token).unwrap();
        assert_eq!(header.alg, "EdDSA");
        assert_eq!(header.kid.as_deref(), key.kid.as_deref());
        assert_eq!(header.typ.as_deref(), Some("JWT"));
        assert_eq!(decoded.sub.as_deref(), Some("user-123"));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let key = generate_key("ES384", "").unwrap();
        let serializer = JwtSerializer::new(&key).unwrap();
        let token = serializer.serialize(&claims()).unwrap();

        let forged_claims = claims().with_subject("admin");
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(
            serializer.deserialize(&forged),
            Err(TokenValidationError::BadSignature)
        );
    }

    #[test]
    fn test_foreign_key_rejected() {
        let serializer = JwtSerializer::new(&generate_key("ES256", "").unwrap()).unwrap();
        let other = JwtSerializer::new(&generate_key("ES256", "").unwrap()).unwrap();
        let token = other.serialize(&claims()).unwrap();
        assert_eq!(
            serializer.deserialize(&token),
            Err(TokenValidationError::BadSignature)
        );
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let serializer = JwtSerializer::new(&generate_key("ES256", "").unwrap()).unwrap();
        let other = JwtSerializer::new(&generate_key("ES384", "").unwrap()).unwrap();
        let token = other.serialize(&claims()).unwrap();
        assert!(matches!(
            serializer.deserialize(&token),
            Err(TokenValidationError::AlgorithmMismatch { expected, actual })
                if expected == "ES256" && actual == "ES384"
        ));
    }

    #[test]
    fn test_malformed_tokens() {
        let serializer = JwtSerializer::new(&generate_key("ES256", "").unwrap()).unwrap();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.xx"] {
            assert!(
                matches!(serializer.deserialize(token), Err(TokenValidationError::Malformed(_))),
                "{token}"
            );
        }
    }
}
