//! JWK model and the closed algorithm/curve enums.

use crate::error::TokenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JWS signing algorithm supported for the active key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    RS384,
    /// RSASSA-PKCS1-v1_5 with SHA-512
    RS512,
    /// ECDSA with P-256 and SHA-256
    ES256,
    /// ECDSA with P-384 and SHA-384
    ES384,
    /// ECDSA with P-521 and SHA-512
    ES512,
    /// EdDSA (Ed25519)
    EdDSA,
}

impl JwsAlgorithm {
    /// Every supported algorithm.
    pub const ALL: [Self; 7] = [
        Self::RS256,
        Self::RS384,
        Self::RS512,
        Self::ES256,
        Self::ES384,
        Self::ES512,
        Self::EdDSA,
    ];

    /// Name used in the JWK `alg` member and the JWS header.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
            Self::EdDSA => "EdDSA",
        }
    }

    /// Key type this algorithm signs with.
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        match self {
            Self::RS256 | Self::RS384 | Self::RS512 => KeyType::Rsa,
            Self::ES256 | Self::ES384 | Self::ES512 => KeyType::Ec,
            Self::EdDSA => KeyType::Okp,
        }
    }

    /// Curve fixed by the algorithm, if any.
    #[must_use]
    pub const fn curve(&self) -> Option<EllipticCurve> {
        match self {
            Self::ES256 => Some(EllipticCurve::P256),
            Self::ES384 => Some(EllipticCurve::P384),
            Self::ES512 => Some(EllipticCurve::P521),
            Self::EdDSA => Some(EllipticCurve::Ed25519),
            Self::RS256 | Self::RS384 | Self::RS512 => None,
        }
    }

    /// RSA modulus size generated for this algorithm.
    #[must_use]
    pub const fn rsa_bits(&self) -> Option<usize> {
        match self {
            Self::RS256 => Some(2048),
            Self::RS384 => Some(3072),
            Self::RS512 => Some(4096),
            _ => None,
        }
    }
}

impl FromStr for JwsAlgorithm {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| TokenError::UnsupportedAlgorithm(s.to_string()))
    }
}

impl fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named curve of an EC or OKP key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EllipticCurve {
    /// NIST P-256
    P256,
    /// NIST P-384
    P384,
    /// NIST P-521
    P521,
    /// Edwards 25519
    Ed25519,
}

impl EllipticCurve {
    /// Name used in the JWK `crv` member.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
            Self::Ed25519 => "Ed25519",
        }
    }

    /// Algorithm a key on this curve signs with when none is recorded.
    #[must_use]
    pub const fn default_algorithm(&self) -> JwsAlgorithm {
        match self {
            Self::P256 => JwsAlgorithm::ES256,
            Self::P384 => JwsAlgorithm::ES384,
            Self::P521 => JwsAlgorithm::ES512,
            Self::Ed25519 => JwsAlgorithm::EdDSA,
        }
    }
}

impl FromStr for EllipticCurve {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P-256" => Ok(Self::P256),
            "P-384" => Ok(Self::P384),
            "P-521" => Ok(Self::P521),
            "Ed25519" => Ok(Self::Ed25519),
            other => Err(TokenError::UnsupportedCurve(other.to_string())),
        }
    }
}

impl fmt::Display for EllipticCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWK `kty` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// RSA
    #[serde(rename = "RSA")]
    Rsa,
    /// Elliptic curve (NIST)
    #[serde(rename = "EC")]
    Ec,
    /// Octet key pair (Edwards)
    #[serde(rename = "OKP")]
    Okp,
}

/// JSON Web Key (RFC 7517) holding an RSA, EC or OKP key.
///
/// Binary members are base64url without padding. Member order is fixed,
/// so encoding a key twice gives identical bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type
    pub kty: KeyType,
    /// Intended use (`sig`)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Signing algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Curve (EC and OKP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Private exponent (RSA) or private scalar/seed (EC, OKP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// RSA first prime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// RSA second prime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// RSA first CRT exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    /// RSA second CRT exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    /// RSA CRT coefficient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    /// X coordinate (EC) or public key (OKP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Y coordinate (EC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Empty key of the given type; callers fill in the members.
    #[must_use]
    pub const fn new(kty: KeyType) -> Self {
        Self {
            kty,
            key_use: None,
            kid: None,
            alg: None,
            crv: None,
            n: None,
            e: None,
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            x: None,
            y: None,
        }
    }

    /// Parse a single JWK from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not a JWK of a known key type.
    pub fn parse(data: &[u8]) -> Result<Self, TokenError> {
        serde_json::from_slice(data)
            .map_err(|e| TokenError::invalid_key(format!("failed to parse JWK: {e}")))
    }

    /// Whether private members are present.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        match self.kty {
            KeyType::Rsa => self.d.is_some() && self.p.is_some() && self.q.is_some(),
            KeyType::Ec | KeyType::Okp => self.d.is_some(),
        }
    }

    /// Copy with every private member removed.
    #[must_use]
    pub fn to_public(&self) -> Self {
        Self {
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            ..self.clone()
        }
    }

    /// Parsed `alg` member.
    ///
    /// # Errors
    ///
    /// Returns an error if `alg` is missing or not a supported algorithm.
    pub fn algorithm(&self) -> Result<JwsAlgorithm, TokenError> {
        self.alg
            .as_deref()
            .ok_or_else(|| TokenError::invalid_key("key does not declare an algorithm"))?
            .parse()
    }

    /// Parsed `crv` member, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if `crv` names an unsupported curve.
    pub fn curve(&self) -> Result<Option<EllipticCurve>, TokenError> {
        self.crv.as_deref().map(str::parse).transpose()
    }

    /// Key ID, or an empty string when absent.
    #[must_use]
    pub fn key_id(&self) -> &str {
        self.kid.as_deref().unwrap_or_default()
    }
}

// Private members stay out of logs.
impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("use", &self.key_use)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("crv", &self.crv)
            .field("private", &self.is_private())
            .finish_non_exhaustive()
    }
}

/// Encode a key to JSON bytes, newline-terminated, without HTML escaping.
///
/// This is the exact byte form written to the plaintext key file and
/// wrapped by the encrypted formats.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_jwk_bytes(key: &Jwk) -> Result<Vec<u8>, TokenError> {
    let mut out = serde_json::to_vec(key)?;
    out.push(b'\n');
    Ok(out)
}
