//! Cache capability: keyed byte storage with optional TTL.

use std::time::Duration;

use async_trait::async_trait;

use weir_types::Error;

/// A key/value cache resource.
///
/// Shared behind the resource manager, so methods take `&self`;
/// implementations provide their own interior synchronisation.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value. Returns [`Error::KeyNotFound`] on a miss.
    async fn get(&self, key: &str) -> Result<Vec<u8>, Error>;

    /// Store a value, overwriting any existing entry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error>;

    /// Store several values; the default loops over [`Cache::set`].
    async fn set_multi(
        &self,
        items: &[(&str, &[u8])],
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        for (key, value) in items {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    /// Store a value only if the key is absent. Returns
    /// [`Error::KeyAlreadyExists`] otherwise.
    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Error>;
}
