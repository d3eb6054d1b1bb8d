//! Claim set and token kinds shared by every token the service issues.

use crate::error::TokenError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Claim naming the token kind.
pub const TOKEN_TYPE_CLAIM: &str = "type";
/// Claim set to `true` on admin access tokens; omitted otherwise.
pub const IS_ADMIN_CLAIM: &str = "isAdmin";
/// Claim carrying the opaque refresh token value.
pub const REFRESH_TOKEN_CLAIM: &str = "rt";

/// The four token kinds, told apart by the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Session token for the identity provider's own API
    Access,
    /// OIDC ID token handed to a client
    Id,
    /// OAuth2 bearer token handed to a client
    OAuthAccess,
    /// Long-lived OAuth2 refresh token
    OAuthRefresh,
}

impl TokenType {
    /// Value of the `type` claim.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access-token",
            Self::Id => "id-token",
            Self::OAuthAccess => "oauth-access-token",
            Self::OAuthRefresh => "refresh-token",
        }
    }

    /// Look up a `type` claim value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        [Self::Access, Self::Id, Self::OAuthAccess, Self::OAuthRefresh]
            .into_iter()
            .find(|t| t.as_str() == value)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `aud` claim: RFC 7519 allows a single string or an array.
///
/// Tokens issued here always carry the single-string form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "value"`
    Single(String),
    /// `"aud": ["a", "b"]`
    Multiple(Vec<String>),
}

impl Audience {
    /// All audience values.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(aud) => vec![aud.as_str()],
            Self::Multiple(auds) => auds.iter().map(String::as_str).collect(),
        }
    }

    /// Whether `audience` is one of the values.
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        self.values().contains(&audience)
    }
}

/// JWT claim set shared by all four token kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    // Registered claims
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Subject (user ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    /// Expiry, Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Not before, Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Issued at, Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    // Private claims
    /// Token kind, see [`TokenType`]
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Admin flag on access tokens
    #[serde(rename = "isAdmin", default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    /// OIDC nonce on ID tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Opaque refresh token value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rt: Option<String>,

    // Everything else (user claims on ID tokens)
    /// Any other claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Claims issued at `now`, expiring `ttl_seconds` later, with a
    /// single-string audience. The expiry saturates at `i64::MAX`.
    pub fn new(issuer: &str, audience: &str, token_type: TokenType, now: i64, ttl_seconds: i64) -> Self {
        Self {
            iss: Some(issuer.to_string()),
            aud: Some(Audience::Single(audience.to_string())),
            iat: Some(now),
            exp: Some(now.saturating_add(ttl_seconds)),
            token_type: Some(token_type.as_str().to_string()),
            ..Self::default()
        }
    }

    /// Sets `sub`.
    pub fn with_subject(mut self, subject: &str) -> Self {
        self.sub = Some(subject.to_string());
        self
    }

    /// Sets `isAdmin` only for admins; non-admin tokens omit the claim.
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin.then_some(true);
        self
    }

    /// Sets `nonce` unless it is empty.
    pub fn with_nonce(mut self, nonce: &str) -> Self {
        if !nonce.is_empty() {
            self.nonce = Some(nonce.to_string());
        }
        self
    }

    /// Sets `rt`.
    pub fn with_refresh_token(mut self, refresh_token: &str) -> Self {
        self.rt = Some(refresh_token.to_string());
        self
    }

    /// Set a claim by name, routing registered names to their typed field.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has the wrong JSON type for a
    /// registered claim.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), TokenError> {
        fn typed<T: DeserializeOwned>(name: &str, value: Value) -> Result<Option<T>, TokenError> {
            serde_json::from_value(value).map_err(|e| {
                TokenError::Serialization(format!("invalid value for claim '{name}': {e}"))
            })
        }

        match name {
            "iss" => self.iss = typed(name, value)?,
            "sub" => self.sub = typed(name, value)?,
            "aud" => self.aud = typed(name, value)?,
            "exp" => self.exp = typed(name, value)?,
            "nbf" => self.nbf = typed(name, value)?,
            "iat" => self.iat = typed(name, value)?,
            TOKEN_TYPE_CLAIM => self.token_type = typed(name, value)?,
            IS_ADMIN_CLAIM => self.is_admin = typed(name, value)?,
            "nonce" => self.nonce = typed(name, value)?,
            REFRESH_TOKEN_CLAIM => self.rt = typed(name, value)?,
            _ => {
                self.extra.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Claim value by name, typed fields included.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        let value = |v: &Option<String>| v.clone().map(Value::String);
        let number = |v: Option<i64>| v.map(Value::from);
        match name {
            "iss" => value(&self.iss),
            "sub" => value(&self.sub),
            "aud" => self.aud.as_ref().and_then(|a| serde_json::to_value(a).ok()),
            "exp" => number(self.exp),
            "nbf" => number(self.nbf),
            "iat" => number(self.iat),
            TOKEN_TYPE_CLAIM => value(&self.token_type),
            IS_ADMIN_CLAIM => self.is_admin.map(Value::Bool),
            "nonce" => value(&self.nonce),
            REFRESH_TOKEN_CLAIM => value(&self.rt),
            _ => self.extra.get(name).cloned(),
        }
    }

    /// Whether `isAdmin` is present and true.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.is_admin.unwrap_or(false)
    }
}
