//! Expiring key-value stores for "task requested" stamps.
//!
//! The contributions guard only needs three primitives: write a value with a
//! TTL, test for a key and read a key back. Redis provides them natively
//! (`SET .. EX`, `EXISTS`, `GET`); [`MemoryStampStore`] mimics them for tests
//! and single-process development runs.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};

#[async_trait]
pub trait StampStore: Send + Sync {
    /// Store `value` at `key`, replacing any previous value, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Human-readable backend name for logs.
    fn backend_name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// Redis-backed stamp store. The multiplexed connection is cloned per call;
/// all clones share one TCP connection.
#[derive(Clone)]
pub struct RedisStampStore {
    conn: MultiplexedConnection,
}

impl RedisStampStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::StampStore(format!("failed to create Redis client: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::StampStore(format!("failed to connect to Redis: {e}")))?;
        tracing::info!("Connected to Redis stamp store");
        Ok(Self { conn })
    }

    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StampStore for RedisStampStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        // Redis rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local stamp store with lazy expiry.
#[derive(Debug, Default)]
pub struct MemoryStampStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryStampStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) stamps.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StampStore for MemoryStampStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| AppError::StampStore(format!("Stamp TTL {:?} out of range", ttl)))?;
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
