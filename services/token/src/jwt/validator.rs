//! Claim validation for verified tokens.
//!
//! Time checks follow the usual JOSE library rules with a symmetric
//! skew: a token is expired once `now >= exp + skew`, and `iat`/`nbf` may
//! be at most `skew` seconds in the future. Absent time claims pass.

use super::claims::{Claims, TokenType};
use thiserror::Error;

/// Clock skew tolerated on `exp`, `nbf` and `iat`, in seconds.
pub const CLOCK_SKEW_SECONDS: i64 = 60;

/// Why a token was rejected. Callers treat every variant as
/// "unauthenticated" and must not reveal which check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    /// Not a three-part compact JWS, or undecodable parts
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature does not verify against the active key
    #[error("signature verification failed")]
    BadSignature,

    /// Header `alg` differs from the active key's algorithm
    #[error("unexpected algorithm: expected {expected}, got {actual}")]
    AlgorithmMismatch {
        /// Algorithm of the active key
        expected: String,
        /// Algorithm named in the header
        actual: String,
    },

    /// `type` claim names a different token kind
    #[error("invalid token type: expected {expected}, got {actual}")]
    WrongType {
        /// Required token type
        expected: String,
        /// Token type found in the claims
        actual: String,
    },

    /// `exp` has passed
    #[error("token has expired")]
    Expired,

    /// `nbf` is in the future
    #[error("token is not valid yet")]
    NotYetValid,

    /// `iat` is in the future
    #[error("token was issued in the future")]
    IssuedInFuture,

    /// `iss` is missing or different
    #[error("issuer mismatch")]
    BadIssuer,

    /// `aud` is missing or does not contain the expected value
    #[error("audience mismatch")]
    BadAudience,

    /// A claim the caller requires is missing or empty
    #[error("missing '{0}' claim")]
    MissingClaim(String),
}

/// Checks applied to the claims of a verified token.
#[derive(Debug, Clone)]
pub struct Validation {
    token_type: TokenType,
    issuer: Option<String>,
    audience: Option<String>,
    skew: i64,
    validate_exp: bool,
}

impl Validation {
    /// Require `token_type`, with the default skew and expiry checking on.
    #[must_use]
    pub const fn new(token_type: TokenType) -> Self {
        Self {
            token_type,
            issuer: None,
            audience: None,
            skew: CLOCK_SKEW_SECONDS,
            validate_exp: true,
        }
    }

    /// Require `iss` to equal `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.issuer = Some(issuer.to_string());
        self
    }

    /// Require `aud` to contain `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.audience = Some(audience.to_string());
        self
    }

    /// Skip the `exp` check; `iat` and `nbf` are still checked.
    #[must_use]
    pub const fn accept_expired(mut self) -> Self {
        self.validate_exp = false;
        self
    }

    /// Validate `claims` at unix time `now`.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn validate(&self, claims: &Claims, now: i64) -> Result<(), TokenValidationError> {
        if let Some(issuer) = &self.issuer {
            if claims.iss.as_deref() != Some(issuer.as_str()) {
                return Err(TokenValidationError::BadIssuer);
            }
        }

        if let Some(audience) = &self.audience {
            if !claims.aud.as_ref().is_some_and(|aud| aud.contains(audience)) {
                return Err(TokenValidationError::BadAudience);
            }
        }

        if self.validate_exp {
            if let Some(exp) = claims.exp {
                if now >= exp.saturating_add(self.skew) {
                    return Err(TokenValidationError::Expired);
                }
            }
        }
        if let Some(iat) = claims.iat {
            if now.saturating_add(self.skew) < iat {
                return Err(TokenValidationError::IssuedInFuture);
            }
        }
        if let Some(nbf) = claims.nbf {
            if now.saturating_add(self.skew) < nbf {
                return Err(TokenValidationError::NotYetValid);
            }
        }

        let expected = self.token_type.as_str();
        match claims.token_type.as_deref() {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(TokenValidationError::WrongType {
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            None => Err(TokenValidationError::MissingClaim("type".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const ISSUER: &str = "https://idp.example";

    fn access_claims() -> Claims {
        Claims::new(ISSUER, ISSUER, TokenType::Access, NOW, 3_600).with_subject("user-1")
    }

    fn access_validation() -> Validation {
        Validation::new(TokenType::Access)
            .with_issuer(ISSUER)
            .with_audience(ISSUER)
    }

    #[test]
    fn test_valid_token() {
        access_validation().validate(&access_claims(), NOW).unwrap();
    }

    #[test]
    fn test_expiry_with_skew() {
        let claims = access_claims();
        let exp = NOW + 3_600;
        let validation = access_validation();

        assert!(validation.validate(&claims, exp).is_ok());
        assert!(validation.validate(&claims, exp + CLOCK_SKEW_SECONDS - 1).is_ok());
        assert_eq!(
            validation.validate(&claims, exp + CLOCK_SKEW_SECONDS),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn test_accept_expired_still_checks_iat_and_nbf() {
        let validation = access_validation().accept_expired();
        let claims = access_claims();
        assert!(validation.validate(&claims, NOW + 86_400).is_ok());

        let future = Claims {
            iat: Some(NOW + 120),
            ..access_claims()
        };
        assert_eq!(
            validation.validate(&future, NOW),
            Err(TokenValidationError::IssuedInFuture)
        );

        let not_yet = Claims {
            nbf: Some(NOW + 120),
            ..access_claims()
        };
        assert_eq!(
            validation.validate(&not_yet, NOW),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn test_iat_within_skew() {
        let claims = Claims {
            iat: Some(NOW + CLOCK_SKEW_SECONDS),
            ..access_claims()
        };
        assert!(access_validation().validate(&claims, NOW).is_ok());
    }

    #[test]
    fn test_issuer_and_audience() {
        let claims = access_claims();
        assert_eq!(
            Validation::new(TokenType::Access)
                .with_issuer("https://other.example")
                .validate(&claims, NOW),
            Err(TokenValidationError::BadIssuer)
        );
        assert_eq!(
            Validation::new(TokenType::Access)
                .with_audience("client-1")
                .validate(&claims, NOW),
            Err(TokenValidationError::BadAudience)
        );

        let no_aud = Claims {
            aud: None,
            ..access_claims()
        };
        assert!(Validation::new(TokenType::Access).validate(&no_aud, NOW).is_ok());
    }

    #[test]
    fn test_type_mismatch() {
        let claims = Claims::new(ISSUER, "client-1", TokenType::OAuthRefresh, NOW, 60);
        assert_eq!(
            Validation::new(TokenType::Access).validate(&claims, NOW),
            Err(TokenValidationError::WrongType {
                expected: "access-token".to_string(),
                actual: "refresh-token".to_string(),
            })
        );

        let untyped = Claims {
            token_type: None,
            ..access_claims()
        };
        assert_eq!(
            Validation::new(TokenType::Access).validate(&untyped, NOW),
            Err(TokenValidationError::MissingClaim("type".to_string()))
        );
    }
}
