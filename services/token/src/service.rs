//! Token issuance and verification with the active signing key.
//!
//! The service holds exactly one key for the lifetime of the process. It is
//! loaded (or generated and saved, on a fresh deployment) during
//! construction and never mutated afterwards, so every method takes `&self`
//! and the service can be shared freely across request handlers.

use crate::config::Config;
use crate::error::TokenError;
use crate::jwk::{ensure_alg_in_key, generate_key, JwsAlgorithm, Jwk, KEY_USAGE_SIGNING};
use crate::jwks::JwksPublisher;
use crate::jwt::{Claims, JwtSerializer, TokenType, TokenValidationError, Validation};
use crate::keys::KeyProvider;
use crate::model::User;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, instrument};

/// Algorithm of the key generated on first boot.
pub const DEFAULT_KEY_ALGORITHM: JwsAlgorithm = JwsAlgorithm::RS256;

/// Lifetime of ID tokens and OAuth access tokens.
pub const CLIENT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Check that `key` may be used as the signing key.
///
/// # Errors
///
/// Returns an error if the key has no ID, is not marked for signing, or is
/// not a private key.
pub fn validate_key(key: &Jwk) -> Result<(), TokenError> {
    if key.key_id().is_empty() {
        return Err(TokenError::invalid_key("key object does not contain a key ID"));
    }
    if key.key_use.as_deref() != Some(KEY_USAGE_SIGNING) {
        return Err(TokenError::invalid_key("key object is not valid for signing"));
    }
    if !key.is_private() {
        return Err(TokenError::invalid_key("key object is not a private key"));
    }
    Ok(())
}

/// `isAdmin` claim of a token; absent means `false`.
#[must_use]
pub fn get_is_admin(claims: &Claims) -> bool {
    claims.is_admin()
}

/// Issues and verifies the four token kinds.
pub struct TokenService {
    app_url: String,
    session_duration: Duration,
    refresh_token_ttl: Duration,
    key: Jwk,
    serializer: JwtSerializer,
    jwks: JwksPublisher,
}

impl TokenService {
    /// Load the signing key through `provider`, generating and saving a new
    /// one if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, generating or saving the key fails, or
    /// the loaded key is unusable. All of these are fatal at startup.
    #[instrument(skip_all, fields(storage = %provider.storage()))]
    pub async fn new(config: &Config, provider: &dyn KeyProvider) -> Result<Self, TokenError> {
        if let Some(key) = provider.load_key().await? {
            let service = Self::with_key(config, key)?;
            info!(kid = service.key_id(), alg = %service.get_key_alg(), "Loaded signing key");
            return Ok(service);
        }

        let key = generate_key(DEFAULT_KEY_ALGORITHM.as_str(), "")?;
        let service = Self::with_key(config, key)?;
        provider.save_key(&service.key).await?;
        info!(kid = service.key_id(), alg = %service.get_key_alg(), "Generated and saved new signing key");
        Ok(service)
    }

    /// Service using `key` directly, without touching storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the key fails [`validate_key`] or cannot sign.
    pub fn with_key(config: &Config, mut key: Jwk) -> Result<Self, TokenError> {
        validate_key(&key)
            .map_err(|e| TokenError::invalid_key(format!("private key is not valid: {e}")))?;
        ensure_alg_in_key(&mut key, None, None);

        let serializer = JwtSerializer::new(&key)?;
        let jwks = JwksPublisher::new(&key)?;

        Ok(Self {
            app_url: config.app_url.clone(),
            session_duration: config.session_duration,
            refresh_token_ttl: config.refresh_token_ttl,
            key,
            serializer,
            jwks,
        })
    }

    /// Sign arbitrary claims with the active key.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or signing fails.
    pub fn sign_token(&self, claims: &Claims) -> Result<String, TokenError> {
        self.serializer.serialize(claims)
    }

    fn verify(&self, token: &str, validation: &Validation) -> Result<Claims, TokenError> {
        let claims = self.serializer.deserialize(token)?;
        validation.validate(&claims, now())?;
        Ok(claims)
    }

    /// Session token for the identity provider's own API.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn generate_access_token(&self, user: &User) -> Result<String, TokenError> {
        let claims = Claims::new(
            &self.app_url,
            &self.app_url,
            TokenType::Access,
            now(),
            seconds(self.session_duration),
        )
        .with_subject(&user.id)
        .with_admin(user.is_admin);
        self.sign_token(&claims)
    }

    /// Verify a session token: signature, issuer, audience, type and times.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Validation`] if any check fails.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        let validation = Validation::new(TokenType::Access)
            .with_issuer(&self.app_url)
            .with_audience(&self.app_url);
        self.verify(token, &validation)
    }

    /// ID token claims for `client_id`. User claims are merged in first, so
    /// the protocol claims (`iss`, `aud`, `iat`, `exp`, `type`) always win.
    ///
    /// # Errors
    ///
    /// Returns an error if a user claim has the wrong type for a registered
    /// claim name.
    pub fn build_id_token(
        &self,
        user_claims: &Map<String, Value>,
        client_id: &str,
        nonce: &str,
    ) -> Result<Claims, TokenError> {
        let mut claims = Claims::default();
        for (name, value) in user_claims {
            claims.set(name, value.clone())?;
        }

        let base = Claims::new(
            &self.app_url,
            client_id,
            TokenType::Id,
            now(),
            seconds(CLIENT_TOKEN_TTL),
        );
        claims.iss = base.iss;
        claims.aud = base.aud;
        claims.iat = base.iat;
        claims.exp = base.exp;
        claims.token_type = base.token_type;

        Ok(claims.with_nonce(nonce))
    }

    /// Signed [`build_id_token`](Self::build_id_token).
    ///
    /// # Errors
    ///
    /// Returns an error if building or signing fails.
    pub fn generate_id_token(
        &self,
        user_claims: &Map<String, Value>,
        client_id: &str,
        nonce: &str,
    ) -> Result<String, TokenError> {
        let claims = self.build_id_token(user_claims, client_id, nonce)?;
        self.sign_token(&claims)
    }

    /// Verify an ID token. With `accept_expired`, `exp` is not checked but
    /// `iat` and `nbf` still are; logout uses this for stale ID tokens.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Validation`] if any check fails.
    pub fn verify_id_token(&self, token: &str, accept_expired: bool) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(TokenType::Id).with_issuer(&self.app_url);
        if accept_expired {
            validation = validation.accept_expired();
        }
        self.verify(token, &validation)
    }

    /// OAuth access token claims for `user` and `client_id`.
    #[must_use]
    pub fn build_oauth_access_token(&self, user: &User, client_id: &str) -> Claims {
        Claims::new(
            &self.app_url,
            client_id,
            TokenType::OAuthAccess,
            now(),
            seconds(CLIENT_TOKEN_TTL),
        )
        .with_subject(&user.id)
    }

    /// Signed [`build_oauth_access_token`](Self::build_oauth_access_token).
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn generate_oauth_access_token(&self, user: &User, client_id: &str) -> Result<String, TokenError> {
        self.sign_token(&self.build_oauth_access_token(user, client_id))
    }

    /// Verify an OAuth access token. The audience is left to the caller,
    /// which knows the client it expects.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Validation`] if any check fails.
    pub fn verify_oauth_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        let validation = Validation::new(TokenType::OAuthAccess).with_issuer(&self.app_url);
        self.verify(token, &validation)
    }

    /// Refresh token wrapping the opaque `refresh_token` value.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn generate_oauth_refresh_token(
        &self,
        user_id: &str,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<String, TokenError> {
        let claims = Claims::new(
            &self.app_url,
            client_id,
            TokenType::OAuthRefresh,
            now(),
            seconds(self.refresh_token_ttl),
        )
        .with_subject(user_id)
        .with_refresh_token(refresh_token);
        self.sign_token(&claims)
    }

    /// Verify a refresh token and return `(user_id, client_id, refresh_token)`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Validation`] if any check fails, the audience is
    /// not exactly one non-empty value, or `sub`/`rt` are missing.
    pub fn verify_oauth_refresh_token(
        &self,
        token: &str,
    ) -> Result<(String, String, String), TokenError> {
        let validation = Validation::new(TokenType::OAuthRefresh).with_issuer(&self.app_url);
        let claims = self.verify(token, &validation)?;

        let refresh_token = claims
            .rt
            .ok_or_else(|| TokenValidationError::MissingClaim("rt".to_string()))?;

        let client_id = match claims.aud.as_ref().map(|aud| aud.values()) {
            Some(values) if values.len() == 1 && !values[0].is_empty() => values[0].to_string(),
            _ => return Err(TokenValidationError::BadAudience.into()),
        };

        let user_id = claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| TokenValidationError::MissingClaim("sub".to_string()))?;

        Ok((user_id, client_id, refresh_token))
    }

    /// Declared `type` of a token, plus its claims, WITHOUT verifying
    /// anything. Only for picking a verifier; never a trust decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be decoded or has no `type`.
    pub fn get_token_type(&self, token: &str) -> Result<(String, Claims), TokenError> {
        let (_, claims) = JwtSerializer::deserialize_unverified(token)?;
        let token_type = claims
            .token_type
            .clone()
            .ok_or_else(|| TokenValidationError::MissingClaim("type".to_string()))?;
        Ok((token_type, claims))
    }

    /// Public half of the active key, with `alg` set.
    #[must_use]
    pub const fn get_public_jwk(&self) -> &Jwk {
        self.jwks.public_key()
    }

    /// Single-key JWKS document, encoded once at startup.
    #[must_use]
    pub fn get_public_jwks_as_json(&self) -> &str {
        self.jwks.as_json()
    }

    /// Algorithm of the active key.
    #[must_use]
    pub const fn get_key_alg(&self) -> JwsAlgorithm {
        self.serializer.algorithm()
    }

    /// ID of the active key.
    #[must_use]
    pub fn key_id(&self) -> &str {
        self.key.key_id()
    }
}
