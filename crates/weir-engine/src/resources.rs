//! Labelled, hot-replaceable resource registries.
//!
//! One [`Resources`] table is shared by every stream in an environment.
//! Access hands out a borrow guard; replacement swaps the instance under
//! the slot's write lock, so the old instance stays valid for every
//! outstanding borrow and is dropped (or closed) only after the swap.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, RwLock};

use weir_sdk::{BatchOutput, Cache, Input, Processor, RateLimit};
use weir_types::Error;

/// Shared-read registry: accesses hold a read borrow, replacement takes
/// the write lock.
struct SharedRegistry<T: ?Sized + Send + Sync> {
    kind: &'static str,
    entries: RwLock<HashMap<String, Arc<RwLock<Box<T>>>>>,
}

impl<T: ?Sized + Send + Sync> SharedRegistry<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn register(&self, label: &str, item: Box<T>) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(label) {
            return Err(Error::DuplicateLabel {
                kind: self.kind,
                label: label.to_string(),
            });
        }
        entries.insert(label.to_string(), Arc::new(RwLock::new(item)));
        Ok(())
    }

    async fn probe(&self, label: &str) -> bool {
        self.entries.read().await.contains_key(label)
    }

    async fn borrow(&self, label: &str) -> Result<OwnedRwLockReadGuard<Box<T>>, Error> {
        let slot = {
            let entries = self.entries.read().await;
            entries
                .get(label)
                .cloned()
                .ok_or_else(|| Error::UnknownComponent {
                    kind: self.kind,
                    name: label.to_string(),
                })?
        };
        Ok(slot.read_owned().await)
    }

    /// Swap in a new instance, returning the old one once every
    /// outstanding borrow has been released.
    async fn replace(&self, label: &str, item: Box<T>) -> Result<Box<T>, Error> {
        let slot = {
            let entries = self.entries.read().await;
            entries
                .get(label)
                .cloned()
                .ok_or_else(|| Error::UnknownComponent {
                    kind: self.kind,
                    name: label.to_string(),
                })?
        };
        let mut guard = slot.write_owned().await;
        Ok(std::mem::replace(&mut *guard, item))
    }
}

/// Exclusive registry for components whose contract needs `&mut`.
struct ExclusiveRegistry<T: ?Sized + Send> {
    kind: &'static str,
    entries: RwLock<HashMap<String, Arc<Mutex<Box<T>>>>>,
}

impl<T: ?Sized + Send> ExclusiveRegistry<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn register(&self, label: &str, item: Box<T>) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(label) {
            return Err(Error::DuplicateLabel {
                kind: self.kind,
                label: label.to_string(),
            });
        }
        entries.insert(label.to_string(), Arc::new(Mutex::new(item)));
        Ok(())
    }

    async fn probe(&self, label: &str) -> bool {
        self.entries.read().await.contains_key(label)
    }

    async fn borrow(&self, label: &str) -> Result<OwnedMutexGuard<Box<T>>, Error> {
        let slot = {
            let entries = self.entries.read().await;
            entries
                .get(label)
                .cloned()
                .ok_or_else(|| Error::UnknownComponent {
                    kind: self.kind,
                    name: label.to_string(),
                })?
        };
        Ok(slot.lock_owned().await)
    }

    async fn replace(&self, label: &str, item: Box<T>) -> Result<Box<T>, Error> {
        let slot = {
            let entries = self.entries.read().await;
            entries
                .get(label)
                .cloned()
                .ok_or_else(|| Error::UnknownComponent {
                    kind: self.kind,
                    name: label.to_string(),
                })?
        };
        let mut guard = slot.lock_owned().await;
        Ok(std::mem::replace(&mut *guard, item))
    }
}

/// The shared resource table: caches, rate limits, and input / output /
/// processor resources referenced by label from anywhere in a config.
pub struct Resources {
    caches: SharedRegistry<dyn Cache>,
    rate_limits: SharedRegistry<dyn RateLimit>,
    outputs: SharedRegistry<dyn BatchOutput>,
    inputs: ExclusiveRegistry<dyn Input>,
    processors: ExclusiveRegistry<dyn Processor>,
}

impl Default for Resources {
    fn default() -> Self {
        Self::new()
    }
}

impl Resources {
    #[must_use]
    pub fn new() -> Self {
        Self {
            caches: SharedRegistry::new("cache resource"),
            rate_limits: SharedRegistry::new("rate limit resource"),
            outputs: SharedRegistry::new("output resource"),
            inputs: ExclusiveRegistry::new("input resource"),
            processors: ExclusiveRegistry::new("processor resource"),
        }
    }

    // ── Caches ──────────────────────────────────────────────────────

    pub async fn register_cache(&self, label: &str, cache: Box<dyn Cache>) -> Result<(), Error> {
        self.caches.register(label, cache).await
    }

    pub async fn probe_cache(&self, label: &str) -> bool {
        self.caches.probe(label).await
    }

    /// Borrow a cache for the duration of the returned guard. The guard
    /// must not be retained past the access; replacement waits on it.
    pub async fn access_cache(
        &self,
        label: &str,
    ) -> Result<OwnedRwLockReadGuard<Box<dyn Cache>>, Error> {
        self.caches.borrow(label).await
    }

    pub async fn replace_cache(
        &self,
        label: &str,
        cache: Box<dyn Cache>,
    ) -> Result<Box<dyn Cache>, Error> {
        self.caches.replace(label, cache).await
    }

    // ── Rate limits ─────────────────────────────────────────────────

    pub async fn register_rate_limit(
        &self,
        label: &str,
        limit: Box<dyn RateLimit>,
    ) -> Result<(), Error> {
        self.rate_limits.register(label, limit).await
    }

    pub async fn probe_rate_limit(&self, label: &str) -> bool {
        self.rate_limits.probe(label).await
    }

    pub async fn access_rate_limit(
        &self,
        label: &str,
    ) -> Result<OwnedRwLockReadGuard<Box<dyn RateLimit>>, Error> {
        self.rate_limits.borrow(label).await
    }

    pub async fn replace_rate_limit(
        &self,
        label: &str,
        limit: Box<dyn RateLimit>,
    ) -> Result<Box<dyn RateLimit>, Error> {
        self.rate_limits.replace(label, limit).await
    }

    // ── Outputs ─────────────────────────────────────────────────────

    pub async fn register_output(
        &self,
        label: &str,
        output: Box<dyn BatchOutput>,
    ) -> Result<(), Error> {
        self.outputs.register(label, output).await
    }

    pub async fn probe_output(&self, label: &str) -> bool {
        self.outputs.probe(label).await
    }

    pub async fn access_output(
        &self,
        label: &str,
    ) -> Result<OwnedRwLockReadGuard<Box<dyn BatchOutput>>, Error> {
        self.outputs.borrow(label).await
    }

    pub async fn replace_output(
        &self,
        label: &str,
        output: Box<dyn BatchOutput>,
    ) -> Result<Box<dyn BatchOutput>, Error> {
        self.outputs.replace(label, output).await
    }

    // ── Inputs ──────────────────────────────────────────────────────

    pub async fn register_input(&self, label: &str, input: Box<dyn Input>) -> Result<(), Error> {
        self.inputs.register(label, input).await
    }

    pub async fn probe_input(&self, label: &str) -> bool {
        self.inputs.probe(label).await
    }

    pub async fn access_input(
        &self,
        label: &str,
    ) -> Result<OwnedMutexGuard<Box<dyn Input>>, Error> {
        self.inputs.borrow(label).await
    }

    pub async fn replace_input(
        &self,
        label: &str,
        input: Box<dyn Input>,
    ) -> Result<Box<dyn Input>, Error> {
        self.inputs.replace(label, input).await
    }

    // ── Processors ──────────────────────────────────────────────────

    pub async fn register_processor(
        &self,
        label: &str,
        processor: Box<dyn Processor>,
    ) -> Result<(), Error> {
        self.processors.register(label, processor).await
    }

    pub async fn probe_processor(&self, label: &str) -> bool {
        self.processors.probe(label).await
    }

    pub async fn access_processor(
        &self,
        label: &str,
    ) -> Result<OwnedMutexGuard<Box<dyn Processor>>, Error> {
        self.processors.borrow(label).await
    }

    pub async fn replace_processor(
        &self,
        label: &str,
        processor: Box<dyn Processor>,
    ) -> Result<Box<dyn Processor>, Error> {
        self.processors.replace(label, processor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    fn expect_err<T, E>(r: Result<T, E>) -> E {
        match r {
            Ok(_) => panic!("expected Err"),
            Err(e) => e,
        }
    }

    struct StaticLimit(Duration);

    #[async_trait]
    impl RateLimit for StaticLimit {
        async fn access(&self) -> Result<Duration, Error> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn register_probe_access() {
        let resources = Resources::new();
        assert!(!resources.probe_rate_limit("rl").await);
        resources
            .register_rate_limit("rl", Box::new(StaticLimit(Duration::ZERO)))
            .await
            .unwrap();
        assert!(resources.probe_rate_limit("rl").await);

        let guard = resources.access_rate_limit("rl").await.unwrap();
        assert_eq!(guard.access().await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let resources = Resources::new();
        resources
            .register_rate_limit("rl", Box::new(StaticLimit(Duration::ZERO)))
            .await
            .unwrap();
        let err = resources
            .register_rate_limit("rl", Box::new(StaticLimit(Duration::ZERO)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateLabel { .. }));
    }

    #[tokio::test]
    async fn unknown_label_errors() {
        let resources = Resources::new();
        let err = expect_err(resources.access_rate_limit("missing").await);
        assert!(matches!(err, Error::UnknownComponent { .. }));
    }

    #[tokio::test]
    async fn replace_waits_for_outstanding_borrow() {
        let resources = std::sync::Arc::new(Resources::new());
        resources
            .register_rate_limit("rl", Box::new(StaticLimit(Duration::from_secs(1))))
            .await
            .unwrap();

        let guard = resources.access_rate_limit("rl").await.unwrap();

        let swap = {
            let resources = resources.clone();
            tokio::spawn(async move {
                resources
                    .replace_rate_limit("rl", Box::new(StaticLimit(Duration::ZERO)))
                    .await
                    .unwrap();
            })
        };

        // The borrow is still live, so the swap cannot have completed yet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!swap.is_finished());
        assert_eq!(guard.access().await.unwrap(), Duration::from_secs(1));
        drop(guard);

        swap.await.unwrap();
        let guard = resources.access_rate_limit("rl").await.unwrap();
        assert_eq!(guard.access().await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn replace_unknown_label_errors() {
        let resources = Resources::new();
        let err = expect_err(
            resources
                .replace_rate_limit("missing", Box::new(StaticLimit(Duration::ZERO)))
                .await,
        );
        assert!(matches!(err, Error::UnknownComponent { .. }));
    }
}
