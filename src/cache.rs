//! Persistent embedding cache with TTL.
//!
//! Query embeddings are cached under a key derived from the lower-cased,
//! whitespace-collapsed query text, so `"Foo  Bar"` and `"foo bar"` share
//! one entry. Entries expire passively after the configured TTL.
//!
//! The cache is an optimization only. [`EmbeddingCache::get`] reports store
//! failures and corrupt rows as a miss, and [`EmbeddingCache::set`] logs and
//! swallows write failures.
//!
//! Each operation is a single-key read or upsert against the backing
//! [`CacheStore`], so concurrent queries need no extra locking here.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::{db, migrate};

/// Lower-case and collapse runs of whitespace to a single space.
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 of [`normalize_query`].
pub fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(text).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEmbedding {
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Key/value backend for [`EmbeddingCache`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<CachedEmbedding>>;

    /// Insert or overwrite the entry under `key`.
    async fn store(&self, key: &str, entry: &CachedEmbedding) -> Result<()>;

    /// Delete entries created before `cutoff`, returning how many were removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

// ============ SQLite store ============

/// Cache rows in the `embedding_cache` table (see [`crate::migrate`]).
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn load(&self, key: &str) -> Result<Option<CachedEmbedding>> {
        let row = sqlx::query("SELECT dims, embedding, created_at FROM embedding_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let dims: i64 = row.try_get("dims")?;
        let blob: Vec<u8> = row.try_get("embedding")?;
        let created_at: i64 = row.try_get("created_at")?;

        let vector = blob_to_vec(&blob)
            .filter(|v| v.len() as i64 == dims)
            .ok_or_else(|| anyhow::anyhow!("corrupt cache row for key {}", key))?;
        let created_at = DateTime::from_timestamp(created_at, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid created_at in cache row for key {}", key))?;

        Ok(Some(CachedEmbedding { vector, created_at }))
    }

    async fn store(&self, key: &str, entry: &CachedEmbedding) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_cache (key, dims, embedding, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(key)
        .bind(entry.vector.len() as i64)
        .bind(vec_to_blob(&entry.vector))
        .bind(entry.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embedding_cache WHERE created_at < ?")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============ In-memory store ============

/// Process-local store for tests and deployments without a database file.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CachedEmbedding>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, key: &str) -> Result<Option<CachedEmbedding>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("memory cache lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn store(&self, key: &str, entry: &CachedEmbedding) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("memory cache lock poisoned"))?;
        entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("memory cache lock poisoned"))?;
        let before = entries.len();
        entries.retain(|_, e| e.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

// ============ Cache client ============

/// TTL-enforcing cache client, built once at startup and shared by the router.
#[derive(Clone)]
pub struct EmbeddingCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: std::time::Duration) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| {
            warn!(ttl = ?ttl, "cache ttl out of range; using 24h");
            Duration::hours(24)
        });
        Self { store, ttl }
    }

    pub fn in_memory(ttl: std::time::Duration) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), ttl)
    }

    /// SQLite-backed cache over the configured database, migrated on open.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::from_pool(pool, config))
    }

    pub fn from_pool(pool: SqlitePool, config: &Config) -> Self {
        Self::new(
            Arc::new(SqliteCacheStore::new(pool)),
            std::time::Duration::from_secs(config.cache.ttl_secs),
        )
    }

    /// Cached vector for `text`, or `None` on miss, expiry, or store failure.
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.get_at(text, Utc::now()).await
    }

    pub(crate) async fn get_at(&self, text: &str, now: DateTime<Utc>) -> Option<Vec<f32>> {
        let key = cache_key(text);
        match self.store.load(&key).await {
            Ok(Some(entry)) => {
                if now - entry.created_at >= self.ttl {
                    debug!(key = %&key[..12], "embedding cache entry expired");
                    None
                } else {
                    debug!(key = %&key[..12], "embedding cache hit");
                    Some(entry.vector)
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "embedding cache read failed; treating as miss");
                None
            }
        }
    }

    /// Store `vector` under the normalized key of `text`. Never fails.
    pub async fn set(&self, text: &str, vector: &[f32]) {
        self.set_at(text, vector, Utc::now()).await
    }

    pub(crate) async fn set_at(&self, text: &str, vector: &[f32], now: DateTime<Utc>) {
        if vector.is_empty() {
            debug!("refusing to cache an empty embedding");
            return;
        }
        let key = cache_key(text);
        let entry = CachedEmbedding {
            vector: vector.to_vec(),
            created_at: now,
        };
        if let Err(e) = self.store.store(&key, &entry).await {
            warn!(error = %e, "embedding cache write failed");
        }
    }

    /// Delete expired entries from the backing store.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.store.purge_before(Utc::now() - self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    const DAY: StdDuration = StdDuration::from_secs(24 * 60 * 60);

    struct UnreachableStore;

    #[async_trait]
    impl CacheStore for UnreachableStore {
        async fn load(&self, _key: &str) -> Result<Option<CachedEmbedding>> {
            anyhow::bail!("connection refused")
        }
        async fn store(&self, _key: &str, _entry: &CachedEmbedding) -> Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn test_normalize_collapses_case_and_whitespace() {
        assert_eq!(normalize_query("  Foo \t Bar\n"), "foo bar");
        assert_eq!(cache_key("Foo  Bar"), cache_key("foo bar"));
        assert_ne!(cache_key("foo bar"), cache_key("foobar"));
    }

    #[tokio::test]
    async fn test_get_after_set_returns_vector() {
        let cache = EmbeddingCache::in_memory(DAY);
        assert_eq!(cache.get("density").await, None);
        cache.set("density", &[0.1, 0.2]).await;
        assert_eq!(cache.get("density").await, Some(vec![0.1, 0.2]));
    }

    #[tokio::test]
    async fn test_case_and_whitespace_share_entry() {
        let cache = EmbeddingCache::in_memory(DAY);
        cache.set("Foo  Bar", &[1.0, 2.0, 3.0]).await;
        assert_eq!(cache.get("foo bar").await, Some(vec![1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = EmbeddingCache::in_memory(DAY);
        cache.set("q", &[1.0]).await;
        cache.set("Q", &[2.0]).await;
        assert_eq!(cache.get("q").await, Some(vec![2.0]));
    }

    #[tokio::test]
    async fn test_never_read_past_expiry() {
        let cache = EmbeddingCache::in_memory(DAY);
        let then = Utc::now() - Duration::hours(25);
        cache.set_at("old query", &[1.0], then).await;
        assert_eq!(cache.get("old query").await, None);

        let just_inside = Utc::now() - Duration::hours(23);
        cache.set_at("fresh query", &[1.0], just_inside).await;
        assert_eq!(cache.get("fresh query").await, Some(vec![1.0]));
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_miss() {
        let cache = EmbeddingCache::new(Arc::new(UnreachableStore), DAY);
        cache.set("q", &[1.0]).await;
        assert_eq!(cache.get("q").await, None);
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip_and_purge() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("cache.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let cache = EmbeddingCache::new(Arc::new(SqliteCacheStore::new(pool.clone())), DAY);
        cache.set("Explain  S8A5", &[0.5, -0.25]).await;
        assert_eq!(cache.get("explain s8a5").await, Some(vec![0.5, -0.25]));

        cache
            .set_at("stale", &[1.0], Utc::now() - Duration::hours(48))
            .await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.get("explain s8a5").await, Some(vec![0.5, -0.25]));
    }

    #[tokio::test]
    async fn test_sqlite_corrupt_row_is_miss() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("cache.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO embedding_cache (key, dims, embedding, created_at) VALUES (?, 4, ?, ?)")
            .bind(cache_key("broken"))
            .bind(vec![1u8, 2, 3])
            .bind(Utc::now().timestamp())
            .execute(&pool)
            .await
            .unwrap();

        let cache = EmbeddingCache::new(Arc::new(SqliteCacheStore::new(pool)), DAY);
        assert_eq!(cache.get("broken").await, None);
    }

    #[tokio::test]
    async fn test_sqlite_mistyped_column_is_miss() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("cache.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO embedding_cache (key, dims, embedding, created_at) VALUES (?, 'abc', ?, ?)")
            .bind(cache_key("broken"))
            .bind(vec_to_blob(&[1.0, 2.0]))
            .bind(Utc::now().timestamp())
            .execute(&pool)
            .await
            .unwrap();

        let cache = EmbeddingCache::new(Arc::new(SqliteCacheStore::new(pool)), DAY);
        assert_eq!(cache.get("broken").await, None);
    }

    #[tokio::test]
    async fn test_open_migrates_configured_database() {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("nested/grounding.sqlite"));

        let cache = EmbeddingCache::open(&config).await.unwrap();
        cache.set("density formula", &[0.5, 0.5]).await;

        assert_eq!(cache.get("Density  Formula").await, Some(vec![0.5, 0.5]));
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }
}
