//! TTL read-through cache
//!
//! Listing, detail, tag-list and config payloads are cached as JSON under
//! deterministic keys. Writers invalidate explicitly before they respond; the TTL
//! is only a safety net.
//!
//! [`CacheService`] never fails: backend errors are logged and treated as a miss
//! (reads) or a no-op (writes and invalidation), so an unavailable cache degrades
//! to direct metadata reads.
//!
//! # Key scheme
//!
//! | key | TTL |
//! |---|---|
//! | `images:list:{page}:{limit}:{tag\|all}:{orientation\|all}` | 3600 s |
//! | `images:detail:{id}` | 3600 s |
//! | `tags:list` | 3600 s |
//! | `config` | 86400 s |

use async_trait::async_trait;
use imghost_common::types::Orientation;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCache;
pub use postgres::PgCache;

/// Errors raised by cache backends
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage behind the cache
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Value for `key` unless it is absent or expired
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration)
        -> Result<(), CacheError>;

    /// Remove `key`; absent keys are fine
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key starting with `prefix`; returns how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Drop expired entries; returns how many were removed
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

/// Cache TTLs
pub struct CacheTtl;

impl CacheTtl {
    pub const IMAGES_LIST: Duration = Duration::from_secs(3600);
    pub const IMAGE_DETAIL: Duration = Duration::from_secs(3600);
    pub const TAGS_LIST: Duration = Duration::from_secs(3600);
    pub const CONFIG: Duration = Duration::from_secs(86400);
}

/// Deterministic cache keys
pub struct CacheKeys;

impl CacheKeys {
    pub const IMAGES_LIST_PREFIX: &'static str = "images:list:";
    pub const TAGS_LIST: &'static str = "tags:list";
    pub const CONFIG: &'static str = "config";

    pub fn images_list(
        page: u32,
        limit: u32,
        tag: Option<&str>,
        orientation: Option<Orientation>,
    ) -> String {
        format!(
            "{}{}:{}:{}:{}",
            Self::IMAGES_LIST_PREFIX,
            page,
            limit,
            tag.unwrap_or("all"),
            orientation.map(|o| o.as_str()).unwrap_or("all")
        )
    }

    pub fn image_detail(id: Uuid) -> String {
        format!("images:detail:{}", id)
    }
}

/// Error-swallowing facade over a [`CacheBackend`]
///
/// Every invalidation bumps a generation counter before touching the backend. A
/// read-through fill whose load overlapped an invalidation removes what it wrote, so
/// a value read before a write committed never outlives that write's invalidation.
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    generation: Arc<AtomicU64>,
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => {
                    debug!(key = %key, "Cache hit");
                    Some(parsed)
                },
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached value has unexpected shape, treating as miss");
                    None
                },
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                None
            },
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            },
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache value");
                return;
            },
        };

        if let Err(e) = self.backend.set(key, value, ttl).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        self.bump_generation();
        if let Err(e) = self.backend.delete(key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
        }
    }

    pub async fn invalidate_by_prefix(&self, prefix: &str) {
        self.bump_generation();
        match self.backend.delete_prefix(prefix).await {
            Ok(removed) => debug!(prefix = %prefix, removed, "Invalidated cache prefix"),
            Err(e) => warn!(prefix = %prefix, error = %e, "Cache prefix invalidation failed"),
        }
    }

    /// Read-through: serve `key` from the cache, or run `load`, store its result and return it
    ///
    /// Errors from `load` are returned as-is and never cached. When an invalidation
    /// ran while `load` was in flight, the loaded value is returned but not kept.
    pub async fn read_through<T, E, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }

        let started = self.generation();
        let value = load().await?;
        self.set(key, &value, ttl).await;

        // Checked after the write: an invalidation landing between check and set
        // would otherwise be undone by the set.
        if self.generation() != started {
            debug!(key = %key, "Invalidated during load, dropping filled entry");
            if let Err(e) = self.backend.delete(key).await {
                warn!(key = %key, error = %e, "Cache delete failed");
            }
        }
        Ok(value)
    }

    pub async fn invalidate_images_list(&self) {
        self.invalidate_by_prefix(CacheKeys::IMAGES_LIST_PREFIX).await;
    }

    pub async fn invalidate_image_detail(&self, id: Uuid) {
        self.delete(&CacheKeys::image_detail(id)).await;
    }

    pub async fn invalidate_tags_list(&self) {
        self.delete(CacheKeys::TAGS_LIST).await;
    }

    /// Listing keys always; the detail key when the image already existed
    pub async fn invalidate_after_image_change(&self, id: Option<Uuid>) {
        match id {
            Some(id) => {
                tokio::join!(self.invalidate_images_list(), self.invalidate_image_detail(id));
            },
            None => self.invalidate_images_list().await,
        }
    }

    /// Tag list and listing keys (tag filters change what a listing returns)
    pub async fn invalidate_after_tag_change(&self) {
        tokio::join!(self.invalidate_tags_list(), self.invalidate_images_list());
    }

    /// Drop expired entries, logging instead of failing
    pub async fn purge_expired(&self) {
        match self.backend.purge_expired().await {
            Ok(0) => {},
            Ok(removed) => debug!(removed, "Purged expired cache entries"),
            Err(e) => warn!(error = %e, "Failed to purge expired cache entries"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that fails every call
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _: &str) -> Result<Option<serde_json::Value>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn set(&self, _: &str, _: serde_json::Value, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn delete(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn delete_prefix(&self, _: &str) -> Result<u64, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn purge_expired(&self) -> Result<u64, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    fn memory_service() -> CacheService {
        CacheService::new(Arc::new(InMemoryCache::new()))
    }

    #[test]
    fn test_key_scheme() {
        assert_eq!(CacheKeys::images_list(1, 12, None, None), "images:list:1:12:all:all");
        assert_eq!(
            CacheKeys::images_list(2, 50, Some("cats"), Some(Orientation::Portrait)),
            "images:list:2:50:cats:portrait"
        );
        let id = Uuid::nil();
        assert_eq!(
            CacheKeys::image_detail(id),
            "images:detail:00000000-0000-0000-0000-000000000000"
        );
        assert!(CacheKeys::images_list(3, 1, None, None).starts_with(CacheKeys::IMAGES_LIST_PREFIX));
    }

    #[test]
    fn test_ttls() {
        assert_eq!(CacheTtl::IMAGES_LIST.as_secs(), 3600);
        assert_eq!(CacheTtl::IMAGE_DETAIL.as_secs(), 3600);
        assert_eq!(CacheTtl::TAGS_LIST.as_secs(), 3600);
        assert_eq!(CacheTtl::CONFIG.as_secs(), 86400);
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let cache = memory_service();
        cache.set("k", &json!({"a": 1}), Duration::from_secs(60)).await;
        let value: Option<serde_json::Value> = cache.get("k").await;
        assert_eq!(value, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_backend_errors_are_swallowed() {
        let cache = CacheService::new(Arc::new(BrokenBackend));

        let value: Option<serde_json::Value> = cache.get("k").await;
        assert!(value.is_none());
        cache.set("k", &json!(1), Duration::from_secs(60)).await;
        cache.delete("k").await;
        cache.invalidate_by_prefix("images:list:").await;
        cache.invalidate_after_tag_change().await;

        let loaded: Result<u32, ()> = cache
            .read_through("k", Duration::from_secs(60), || async { Ok(7) })
            .await;
        assert_eq!(loaded, Ok(7));
    }

    #[tokio::test]
    async fn test_read_through_loads_once() {
        let cache = memory_service();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<String, ()> = cache
                .read_through("tags:list", CacheTtl::TAGS_LIST, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("fresh".to_string())
                })
                .await;
            assert_eq!(value.unwrap(), "fresh");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_through_does_not_cache_errors() {
        let cache = memory_service();

        let first: Result<u32, &str> = cache
            .read_through("images:detail:x", CacheTtl::IMAGE_DETAIL, || async { Err("not found") })
            .await;
        assert_eq!(first, Err("not found"));

        let cached: Option<u32> = cache.get("images:detail:x").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_after_image_change() {
        let cache = memory_service();
        let changed = Uuid::new_v4();
        let other = Uuid::new_v4();
        let list_key = CacheKeys::images_list(1, 12, None, None);

        cache.set(&list_key, &json!([]), CacheTtl::IMAGES_LIST).await;
        cache.set(&CacheKeys::image_detail(changed), &json!({}), CacheTtl::IMAGE_DETAIL).await;
        cache.set(&CacheKeys::image_detail(other), &json!({}), CacheTtl::IMAGE_DETAIL).await;
        cache.set(CacheKeys::TAGS_LIST, &json!([]), CacheTtl::TAGS_LIST).await;

        cache.invalidate_after_image_change(Some(changed)).await;

        assert!(cache.get::<serde_json::Value>(&list_key).await.is_none());
        assert!(cache.get::<serde_json::Value>(&CacheKeys::image_detail(changed)).await.is_none());
        assert!(cache.get::<serde_json::Value>(&CacheKeys::image_detail(other)).await.is_some());
        assert!(cache.get::<serde_json::Value>(CacheKeys::TAGS_LIST).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_after_tag_change() {
        let cache = memory_service();
        let list_key = CacheKeys::images_list(1, 12, Some("cats"), None);
        cache.set(&list_key, &json!([]), CacheTtl::IMAGES_LIST).await;
        cache.set(CacheKeys::TAGS_LIST, &json!([]), CacheTtl::TAGS_LIST).await;
        cache.set(CacheKeys::CONFIG, &json!({}), CacheTtl::CONFIG).await;

        cache.invalidate_after_tag_change().await;

        assert!(cache.get::<serde_json::Value>(&list_key).await.is_none());
        assert!(cache.get::<serde_json::Value>(CacheKeys::TAGS_LIST).await.is_none());
        assert!(cache.get::<serde_json::Value>(CacheKeys::CONFIG).await.is_some());
    }

    #[tokio::test]
    async fn test_fill_racing_an_invalidation_is_not_kept() {
        let cache = memory_service();
        let (loaded_tx, loaded_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .read_through::<String, (), _, _>(CacheKeys::TAGS_LIST, CacheTtl::TAGS_LIST, move || async move {
                        let value = "old-tags".to_string();
                        loaded_tx.send(()).unwrap();
                        release_rx.await.unwrap();
                        Ok(value)
                    })
                    .await
            })
        };

        // The writer commits and invalidates while the reader holds the old value
        loaded_rx.await.unwrap();
        cache.invalidate_tags_list().await;
        release_tx.send(()).unwrap();

        assert_eq!(reader.await.unwrap(), Ok("old-tags".to_string()));
        assert!(cache.get::<String>(CacheKeys::TAGS_LIST).await.is_none());

        // Fills that do not overlap an invalidation are kept
        let fresh: Result<String, ()> = cache
            .read_through(CacheKeys::TAGS_LIST, CacheTtl::TAGS_LIST, || async {
                Ok("new-tags".to_string())
            })
            .await;
        assert_eq!(fresh, Ok("new-tags".to_string()));
        assert_eq!(cache.get::<String>(CacheKeys::TAGS_LIST).await, Some("new-tags".to_string()));
    }
}
