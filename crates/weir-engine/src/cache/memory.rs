//! In-memory cache with optional TTL expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use weir_sdk::Cache;
use weir_types::Error;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryCacheConfig {
    /// Default TTL applied when the caller passes none, e.g. `"60s"`.
    #[serde(default)]
    pub default_ttl: Option<String>,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    default_ttl: Option<Duration>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(conf: &MemoryCacheConfig) -> Self {
        let default_ttl = conf
            .default_ttl
            .as_deref()
            .and_then(|s| crate::config::parse_duration(s).ok());
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    fn entry(&self, value: &[u8], ttl: Option<Duration>) -> Entry {
        Entry {
            value: value.to_vec(),
            expires_at: ttl.or(self.default_ttl).map(|d| Instant::now() + d),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                Err(Error::KeyNotFound)
            }
            Some(entry) => Ok(entry.value.clone()),
            None => Err(Error::KeyNotFound),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), self.entry(value, ttl));
        Ok(())
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(existing) = entries.get(key) {
            if !existing.expired(now) {
                return Err(Error::KeyAlreadyExists);
            }
        }
        entries.insert(key.to_string(), self.entry(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> MemoryCache {
        MemoryCache::new(&MemoryCacheConfig::default())
    }

    #[tokio::test]
    async fn set_get_delete() {
        let c = cache();
        c.set("k", b"v", None).await.unwrap();
        assert_eq!(c.get("k").await.unwrap(), b"v".to_vec());
        c.delete("k").await.unwrap();
        assert_eq!(c.get("k").await, Err(Error::KeyNotFound));
    }

    #[tokio::test]
    async fn add_rejects_existing_key() {
        let c = cache();
        c.add("k", b"first", None).await.unwrap();
        assert_eq!(c.add("k", b"second", None).await, Err(Error::KeyAlreadyExists));
        assert_eq!(c.get("k").await.unwrap(), b"first".to_vec());
    }

    #[tokio::test]
    async fn delete_absent_key_is_ok() {
        let c = cache();
        c.delete("missing").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_entries() {
        let c = cache();
        c.set("k", b"v", Some(Duration::from_secs(1))).await.unwrap();
        assert!(c.get("k").await.is_ok());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(c.get("k").await, Err(Error::KeyNotFound));
        // An expired key can be added again.
        c.add("k", b"fresh", None).await.unwrap();
    }

    #[tokio::test]
    async fn set_multi_default_impl() {
        let c = cache();
        c.set_multi(&[("a", b"1".as_slice()), ("b", b"2")], None)
            .await
            .unwrap();
        assert_eq!(c.get("a").await.unwrap(), b"1".to_vec());
        assert_eq!(c.get("b").await.unwrap(), b"2".to_vec());
    }
}
