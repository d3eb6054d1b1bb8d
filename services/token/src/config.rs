//! Centralized configuration for the token service.
//!
//! All configuration is loaded from environment variables and validated
//! at startup. Nothing in the crate reads the environment after this.

use crate::error::TokenError;
use latchkey_common::TracingConfig;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default issuer and audience base.
pub const DEFAULT_APP_URL: &str = "http://localhost:1411";

/// Default directory for key files.
pub const DEFAULT_KEYS_PATH: &str = "data/keys";

/// Default key-value store URL.
pub const DEFAULT_KV_URL: &str = "redis://127.0.0.1:6379";

/// Default lifetime of OAuth refresh tokens.
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Upper bound for any configured token lifetime (ten years).
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Where the signing key is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysStorage {
    /// Key files under `KEYS_PATH`
    File,
    /// Encrypted row in the key-value store
    Database,
}

impl KeysStorage {
    /// Value accepted in `KEYS_STORAGE`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Database => "database",
        }
    }
}

impl FromStr for KeysStorage {
    type Err = TokenError;

    /// Empty selects `file`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "file" => Ok(Self::File),
            "database" => Ok(Self::Database),
            other => Err(TokenError::config(format!(
                "invalid value for KEYS_STORAGE: {other}"
            ))),
        }
    }
}

impl fmt::Display for KeysStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signing key storage settings.
#[derive(Debug)]
pub struct KeysConfig {
    /// Storage backend
    pub storage: KeysStorage,
    /// Directory for the file backend
    pub keys_path: PathBuf,
    /// Operator secret the KEK is derived from
    pub encryption_key: Option<SecretString>,
    /// Stable per-instance identifier bound into the KEK
    pub instance_id: String,
}

impl KeysConfig {
    /// File storage in `keys_path`, unencrypted.
    pub fn file(keys_path: impl Into<PathBuf>) -> Self {
        Self {
            storage: KeysStorage::File,
            keys_path: keys_path.into(),
            encryption_key: None,
            instance_id: String::new(),
        }
    }

    /// Database storage encrypted under `secret` for `instance_id`.
    pub fn database(secret: &str, instance_id: &str) -> Self {
        Self {
            storage: KeysStorage::Database,
            keys_path: PathBuf::from(DEFAULT_KEYS_PATH),
            encryption_key: Some(SecretString::from(secret.to_string())),
            instance_id: instance_id.to_string(),
        }
    }

    /// Add an encryption secret bound to `instance_id`.
    #[must_use]
    pub fn with_encryption(mut self, secret: &str, instance_id: &str) -> Self {
        self.encryption_key = Some(SecretString::from(secret.to_string()));
        self.instance_id = instance_id.to_string();
        self
    }

    /// Whether a non-empty encryption secret is configured.
    #[must_use]
    pub fn has_encryption_key(&self) -> bool {
        self.encryption_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }

    /// Check the storage invariants.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if database storage lacks a secret, or
    /// a secret lacks an instance ID.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.storage == KeysStorage::Database && !self.has_encryption_key() {
            return Err(TokenError::config(
                "ENCRYPTION_KEY or ENCRYPTION_KEY_FILE must be non-empty when KEYS_STORAGE is database",
            ));
        }
        if self.has_encryption_key() && self.instance_id.is_empty() {
            return Err(TokenError::config(
                "INSTANCE_ID must be set when an encryption key is configured",
            ));
        }
        Ok(())
    }
}

/// Token service configuration.
#[derive(Debug)]
pub struct Config {
    /// Issuer, and audience of access tokens
    pub app_url: String,
    /// Lifetime of access tokens
    pub session_duration: Duration,
    /// Lifetime of OAuth refresh tokens
    pub refresh_token_ttl: Duration,
    /// Signing key storage
    pub keys: KeysConfig,
    /// Key-value store for database key storage
    pub kv_url: String,
    /// Logging
    pub tracing: TracingConfig,
}

impl Config {
    /// Defaults with the given key storage; used by tests and tools.
    pub fn new(keys: KeysConfig) -> Self {
        Self {
            app_url: DEFAULT_APP_URL.to_string(),
            session_duration: Duration::from_secs(60 * 60),
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            keys,
            kv_url: DEFAULT_KV_URL.to_string(),
            tracing: TracingConfig::default().with_service_name("latchkey-token"),
        }
    }

    /// Load configuration from `.env` and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if variables are invalid or inconsistent.
    pub fn from_env() -> Result<Self, TokenError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if variables are invalid or inconsistent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TokenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let app_url = var("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string());
        let session_minutes: u64 = parse_var(&var, "SESSION_DURATION", 60)?;
        let refresh_seconds: u64 = parse_var(
            &var,
            "REFRESH_TOKEN_TTL",
            DEFAULT_REFRESH_TOKEN_TTL.as_secs(),
        )?;

        let storage: KeysStorage = var("KEYS_STORAGE").unwrap_or_default().parse()?;
        let keys_path = PathBuf::from(var("KEYS_PATH").unwrap_or_else(|| DEFAULT_KEYS_PATH.to_string()));
        let encryption_key = match (var("ENCRYPTION_KEY"), var("ENCRYPTION_KEY_FILE")) {
            (Some(key), _) => Some(SecretString::from(key)),
            (None, Some(path)) => Some(read_secret_file(&path)?),
            (None, None) => None,
        };

        let config = Self {
            app_url,
            session_duration: Duration::from_secs(session_minutes.saturating_mul(60)),
            refresh_token_ttl: Duration::from_secs(refresh_seconds),
            keys: KeysConfig {
                storage,
                keys_path,
                encryption_key,
                instance_id: var("INSTANCE_ID").unwrap_or_default(),
            },
            kv_url: var("KV_URL").unwrap_or_else(|| DEFAULT_KV_URL.to_string()),
            tracing: TracingConfig::from_lookup(&lookup).with_service_name("latchkey-token"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<(), TokenError> {
        validate_app_url(&self.app_url)?;
        if self.session_duration.is_zero() {
            return Err(TokenError::config("SESSION_DURATION must be greater than zero"));
        }
        if self.session_duration > MAX_TOKEN_TTL {
            return Err(TokenError::config("SESSION_DURATION exceeds the maximum token lifetime"));
        }
        if self.refresh_token_ttl.is_zero() {
            return Err(TokenError::config("REFRESH_TOKEN_TTL must be greater than zero"));
        }
        if self.refresh_token_ttl > MAX_TOKEN_TTL {
            return Err(TokenError::config("REFRESH_TOKEN_TTL exceeds the maximum token lifetime"));
        }
        self.keys.validate()
    }
}

fn validate_app_url(app_url: &str) -> Result<(), TokenError> {
    let parsed =
        Url::parse(app_url).map_err(|_| TokenError::config("APP_URL is not a valid URL"))?;
    // The parser normalizes an empty path to "/", so check the raw string too.
    if parsed.path() != "/" || app_url.ends_with('/') {
        return Err(TokenError::config("APP_URL must not contain a path"));
    }
    Ok(())
}

/// Parse a variable with a default value.
fn parse_var<T, F>(var: &F, name: &str, default: T) -> Result<T, TokenError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(val) => val
            .parse()
            .map_err(|e| TokenError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}

/// Read a secret file, dropping trailing newlines.
fn read_secret_file(path: &str) -> Result<SecretString, TokenError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        TokenError::config(format!("failed to read ENCRYPTION_KEY_FILE '{path}': {e}"))
    })?;
    Ok(SecretString::from(
        contents.trim_end_matches(['\r', '\n']).to_string(),
    ))
}
