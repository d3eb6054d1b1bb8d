//! Key-value persistence handle used by the database key provider.

use async_trait::async_trait;
use latchkey_common::{PlatformError, RetryConfig, RetryPolicy};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Attempts for the initial store connection.
pub const CONNECT_ATTEMPTS: u32 = 3;

/// Delay between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Deadline for a single connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from a [`KvStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Insert-only write hit an existing row
    #[error("key '{key}' already exists")]
    Conflict {
        /// Row key
        key: String,
    },

    /// Backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its deadline
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other backend failure
    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Conflict on `key`.
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    /// Backend failure with a message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Classify a connection failure for the retry policy.
fn to_platform_error(err: StoreError) -> PlatformError {
    match err {
        StoreError::Unavailable(msg) => PlatformError::unavailable(msg),
        StoreError::Timeout(after) => PlatformError::timeout(format!("{after:?}")),
        other => PlatformError::invalid_input(other.to_string()),
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Single-table `(key, value)` store with insert-conflict detection.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert a new row. Fails with [`StoreError::Conflict`] if `key` exists.
    async fn insert(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Insert or overwrite a row.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-process store for tests and single-node development.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    rows: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn insert(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(key) {
            return Err(StoreError::conflict(key));
        }
        rows.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Redis-backed store. Inserts use `SET NX`, so concurrent writers of the
/// same key see exactly one success.
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    /// Connect once.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Connect with fixed backoff: [`CONNECT_ATTEMPTS`] attempts,
    /// [`CONNECT_RETRY_DELAY`] apart.
    ///
    /// # Errors
    ///
    /// Returns the last connection error once attempts are exhausted.
    pub async fn connect_with_retry(redis_url: &str) -> Result<Self, StoreError> {
        let policy = RetryPolicy::new(RetryConfig::fixed(CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY));
        let store = policy
            .execute("kv_connect", move || async move {
                match tokio::time::timeout(CONNECT_TIMEOUT, Self::connect(redis_url)).await {
                    Ok(result) => result.map_err(to_platform_error),
                    Err(_) => Err(PlatformError::timeout(redis_url)),
                }
            })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!("Connected to key-value store");
        Ok(store)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn insert(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        match reply {
            Some(_) => Ok(()),
            None => Err(StoreError::conflict(key)),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}
