//! Source cache for extracted page text.
//!
//! Only URLs on high-trust domains are cached. Entries expire lazily: a read
//! past the TTL evicts the entry and reports a miss. [`SourceCache::clear_expired`]
//! performs the same eviction in bulk.

use chrono::{Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::error::StorageResult;
use crate::storage::{CacheEntry, SqliteStorage, Storage};

/// Domain substrings whose pages are worth caching.
pub const CACHE_WORTHY_DOMAINS: &[&str] = &[
    "github.com",
    "docs.",
    "documentation.",
    ".edu",
    ".gov",
    ".org",
    "arxiv.org",
    "wikipedia.org",
    "stackoverflow.com",
    "python.org",
    "ai.google.dev",
    "cloud.google.com",
    "openai.com",
    "anthropic.com",
    "huggingface.co",
    "paperswithcode.com",
];

/// Whether `url` belongs to a domain on the cache allow-list.
pub fn should_cache(url: &str) -> bool {
    let lower = url.to_lowercase();
    CACHE_WORTHY_DOMAINS
        .iter()
        .any(|domain| lower.contains(domain))
}

/// Stable cache key for a URL (hex-encoded SHA-256).
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache in this process
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Number of stored entries
    pub entry_count: usize,
    /// Total stored content size
    pub total_size_bytes: u64,
    pub ttl_hours: i64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Total stored size in megabytes
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// TTL-bounded cache of extracted page text, persisted in SQLite
pub struct SourceCache {
    storage: SqliteStorage,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SourceCache {
    /// Create a cache whose entries live for `ttl_hours`
    pub fn new(storage: SqliteStorage, ttl_hours: i64) -> Self {
        Self {
            storage,
            ttl: Duration::hours(ttl_hours),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached content for `url`, if present and within TTL.
    ///
    /// Storage failures are logged and reported as a miss.
    pub async fn get(&self, url: &str) -> Option<String> {
        let key = cache_key(url);

        let entry = match self.storage.get_cache_entry(&key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(url = %url, error = %e, "Cache lookup failed");
                None
            }
        };

        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if self.is_expired(&entry) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(url = %url, "Cache entry expired, evicting");
            if let Err(e) = self.storage.delete_cache_entry(&key).await {
                warn!(url = %url, error = %e, "Failed to evict expired cache entry");
            }
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(url = %url, "Cache hit");
        Some(entry.content)
    }

    /// Store `content` for `url`. Returns whether anything was written.
    ///
    /// Empty content and URLs outside the allow-list are skipped.
    pub async fn put(&self, url: &str, content: &str) -> bool {
        if content.is_empty() || !should_cache(url) {
            return false;
        }

        let entry = CacheEntry::new(cache_key(url), url, content);
        match self.storage.put_cache_entry(&entry).await {
            Ok(()) => {
                debug!(url = %url, size_bytes = entry.size_bytes, "Cached page content");
                true
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to cache page content");
                false
            }
        }
    }

    /// Remove the entry for `url`. Returns whether one existed.
    pub async fn remove(&self, url: &str) -> StorageResult<bool> {
        self.storage.delete_cache_entry(&cache_key(url)).await
    }

    /// Evict every entry past its TTL. Returns the number evicted.
    pub async fn clear_expired(&self) -> StorageResult<usize> {
        let cutoff = Utc::now() - self.ttl;
        let mut removed = 0;

        for entry in self.storage.list_cache_index().await? {
            if entry.created_at < cutoff && self.storage.delete_cache_entry(&entry.cache_key).await?
            {
                removed += 1;
            }
        }

        info!(removed, "Cleared expired cache entries");
        Ok(removed)
    }

    /// Remove every entry. Returns the number removed.
    pub async fn clear_all(&self) -> StorageResult<u64> {
        let removed = self.storage.delete_all_cache_entries().await?;
        info!(removed, "Cleared source cache");
        Ok(removed)
    }

    /// Current statistics
    pub async fn stats(&self) -> StorageResult<CacheStats> {
        let index = self.storage.list_cache_index().await?;

        Ok(CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            entry_count: index.len(),
            total_size_bytes: index.iter().map(|e| e.size_bytes.max(0) as u64).sum(),
            ttl_hours: self.ttl.num_hours(),
        })
    }

    /// Hits recorded by this instance
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses recorded by this instance
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        Utc::now() - entry.created_at > self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_cache_allow_list() {
        assert!(should_cache("https://github.com/tokio-rs/tokio"));
        assert!(should_cache("https://docs.rs/tokio"));
        assert!(should_cache("https://cs.stanford.edu/paper"));
        assert!(should_cache("https://en.wikipedia.org/wiki/Rust"));
        assert!(should_cache("https://HUGGINGFACE.co/models"));
        assert!(!should_cache("https://random-blog.com/post"));
        assert!(!should_cache("https://medium.com/@someone/article"));
    }

    #[test]
    fn test_cache_key_is_stable_and_distinct() {
        let a = cache_key("https://a.org");
        assert_eq!(a, cache_key("https://a.org"));
        assert_ne!(a, cache_key("https://b.org"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            entry_count: 0,
            total_size_bytes: 0,
            ttl_hours: 24,
        };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);

        let empty = CacheStats {
            hits: 0,
            misses: 0,
            ..stats
        };
        assert_eq!(empty.hit_rate(), 0.0);
    }
}
