use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::metrics::track_cache_operation;

/// Ephemeral key/value storage with expiry. Nothing kept here is
/// authoritative; losing it only costs recomputation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn ping(&self) -> Result<()>;
    fn backend(&self) -> &'static str;
}

pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to decode cached value for {}", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl_seconds: u64,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set_ex(key, &raw, ttl_seconds).await
}

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = redis::Client::open(uri).context("Invalid Redis URI")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(key)
                .query_async::<Option<String>>(&mut conn)
                .await
                .context("Redis GET failed")
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        track_cache_operation("set", async {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_seconds)
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
                .context("Redis SETEX failed")
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<()>(&mut conn)
                .await
                .context("Redis DEL failed")
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(
            Duration::from_millis(500),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .context("Redis timeout after 500ms")?
        .context("Redis PING failed")?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Process-local cache for tests and single-node runs. Expired entries are
/// dropped lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.0.clone(), entry.1 > now));
        match hit {
            Some((value, true)) => Ok(Some(value)),
            Some((_, false)) => {
                self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let expires = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
