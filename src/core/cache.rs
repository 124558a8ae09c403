use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

/// 以查詢名稱為鍵的快取；超過 stale time 的項目視為過期
#[derive(Debug)]
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    stale_time: Duration,
    enabled: bool,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), true)
    }
}

impl QueryCache {
    pub fn new(stale_time: Duration, enabled: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stale_time,
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, false)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() >= self.stale_time {
            tracing::debug!("Cache entry '{}' is stale", key);
            return None;
        }

        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => {
                tracing::debug!("Cache hit for '{}'", key);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("Cache entry '{}' has unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        if !self.enabled {
            return;
        }

        match serde_json::to_value(value) {
            Ok(value) => {
                let mut entries = self.entries.write().await;
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value,
                        stored_at: Instant::now(),
                    },
                );
            }
            Err(e) => tracing::warn!("Skipping cache for '{}': {}", key, e),
        }
    }

    pub async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    /// 移除所有以 `prefix` 開頭的鍵，例如 `history` 會同時清掉 `history:42`
    pub async fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !key.starts_with(prefix));
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_fresh_entry() {
        let cache = QueryCache::default();
        cache.set("tags", &vec!["weeknight", "spicy"]).await;

        let tags: Vec<String> = cache.get("tags").await.unwrap();
        assert_eq!(tags, vec!["weeknight", "spicy"]);
    }

    #[tokio::test]
    async fn test_stale_entries_are_misses() {
        let cache = QueryCache::new(Duration::ZERO, true);
        cache.set("tags", &vec!["a"]).await;

        assert!(cache.get::<Vec<String>>("tags").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let cache = QueryCache::default();
        cache.set("history", &1).await;
        cache.set("history:42", &2).await;
        cache.set("dishes", &3).await;

        cache.invalidate_prefix("history").await;

        assert!(cache.get::<i32>("history").await.is_none());
        assert!(cache.get::<i32>("history:42").await.is_none());
        assert_eq!(cache.get::<i32>("dishes").await, Some(3));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() {
        let cache = QueryCache::disabled();
        cache.set("dishes", &3).await;
        assert!(cache.get::<i32>("dishes").await.is_none());
        assert!(cache.is_empty().await);
    }
}
