//! Integration tests for the source cache
//!
//! Tests TTL eviction, the domain allow-list and statistics against an
//! in-memory SQLite database.

use chrono::{Duration, Utc};

use research_orchestrator::cache::{cache_key, SourceCache};
use research_orchestrator::storage::{CacheEntry, SqliteStorage, Storage};

const DOC_URL: &str = "https://docs.rs/tokio/latest/tokio/runtime";

async fn create_cache(ttl_hours: i64) -> (SourceCache, SqliteStorage) {
    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    (SourceCache::new(storage.clone(), ttl_hours), storage)
}

/// Insert an entry that was written `age_hours` ago
async fn insert_aged(storage: &SqliteStorage, url: &str, content: &str, age_hours: i64) {
    let entry = CacheEntry::new(cache_key(url), url, content)
        .with_created_at(Utc::now() - Duration::hours(age_hours));
    storage.put_cache_entry(&entry).await.unwrap();
}

#[tokio::test]
async fn test_put_then_get() {
    let (cache, _) = create_cache(24).await;

    assert!(cache.put(DOC_URL, "runtime docs").await);
    assert_eq!(cache.get(DOC_URL).await.as_deref(), Some("runtime docs"));
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 0);
}

#[tokio::test]
async fn test_miss_is_counted() {
    let (cache, _) = create_cache(24).await;

    assert!(cache.get(DOC_URL).await.is_none());
    assert_eq!(cache.misses(), 1);
}

#[tokio::test]
async fn test_untrusted_domain_not_cached() {
    let (cache, storage) = create_cache(24).await;

    assert!(!cache.put("https://random-blog.com/post", "content").await);
    assert!(storage.list_cache_index().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_content_not_cached() {
    let (cache, storage) = create_cache(24).await;

    assert!(!cache.put(DOC_URL, "").await);
    assert!(storage.list_cache_index().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_entry_evicted_on_read() {
    let (cache, storage) = create_cache(24).await;
    insert_aged(&storage, DOC_URL, "stale", 25).await;

    assert!(cache.get(DOC_URL).await.is_none());
    assert_eq!(cache.misses(), 1);
    assert!(
        storage.get_cache_entry(&cache_key(DOC_URL)).await.unwrap().is_none(),
        "Expired entry should be evicted on lookup"
    );
}

#[tokio::test]
async fn test_entry_within_ttl_served() {
    let (cache, storage) = create_cache(24).await;
    insert_aged(&storage, DOC_URL, "fresh enough", 23).await;

    assert_eq!(cache.get(DOC_URL).await.as_deref(), Some("fresh enough"));
}

#[tokio::test]
async fn test_clear_expired_only_removes_old_entries() {
    let (cache, storage) = create_cache(24).await;
    insert_aged(&storage, "https://a.org/old-1", "x", 30).await;
    insert_aged(&storage, "https://a.org/old-2", "x", 48).await;
    insert_aged(&storage, "https://a.org/new", "x", 1).await;

    assert_eq!(cache.clear_expired().await.unwrap(), 2);

    let remaining = storage.list_cache_index().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].url, "https://a.org/new");
}

/// Overwrite the stored creation time of `url` with raw text
async fn corrupt_created_at(storage: &SqliteStorage, url: &str, value: &str) {
    sqlx::query("UPDATE source_cache SET created_at = ? WHERE cache_key = ?")
        .bind(value)
        .bind(cache_key(url))
        .execute(storage.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreadable_timestamp_counts_as_expired() {
    let (cache, storage) = create_cache(24).await;
    assert!(cache.put(DOC_URL, "runtime docs").await);
    corrupt_created_at(&storage, DOC_URL, "not-a-timestamp").await;

    let index = storage.list_cache_index().await.unwrap();
    assert_eq!(index[0].created_at, chrono::DateTime::UNIX_EPOCH);

    assert!(cache.get(DOC_URL).await.is_none());
    assert_eq!(cache.misses(), 1);
    assert!(storage.get_cache_entry(&cache_key(DOC_URL)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_clear_expired_removes_unreadable_timestamps() {
    let (cache, storage) = create_cache(24).await;
    insert_aged(&storage, "https://a.org/corrupt", "x", 1).await;
    insert_aged(&storage, "https://a.org/new", "x", 1).await;
    corrupt_created_at(&storage, "https://a.org/corrupt", "").await;

    assert_eq!(cache.clear_expired().await.unwrap(), 1);

    let remaining = storage.list_cache_index().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].url, "https://a.org/new");
}

#[tokio::test]
async fn test_clear_all_and_remove() {
    let (cache, _) = create_cache(24).await;
    cache.put("https://a.org/1", "one").await;
    cache.put("https://a.org/2", "two").await;

    assert!(cache.remove("https://a.org/1").await.unwrap());
    assert!(!cache.remove("https://a.org/1").await.unwrap());
    assert_eq!(cache.clear_all().await.unwrap(), 1);
}

#[tokio::test]
async fn test_stats() {
    let (cache, _) = create_cache(12).await;
    cache.put("https://a.org/1", "12345").await;
    cache.put("https://a.org/2", "123").await;
    cache.get("https://a.org/1").await;
    cache.get("https://a.org/missing").await;

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.total_size_bytes, 8);
    assert_eq!(stats.ttl_hours, 12);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
}
