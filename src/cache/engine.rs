//! Cache Engine Module
//!
//! Facade composing the driver registry, key validation, codecs, TTL tracking
//! and change events into set/get/remove/clear and batch operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::debug;

use crate::cache::codec::bytes_to_text;
use crate::cache::{CacheCodec, CacheCounters, KeyValidator, StatsSnapshot, TtlTracker};
use crate::config::CacheConfig;
use crate::driver::{Driver, DriverKind, DriverRegistry};
use crate::error::{CacheError, DriverError, Result};
use crate::events::{CacheEvent, EventKind, SubscriptionHub, SubscriptionId};

/// Per-key outcome of a batch operation, in input order.
pub type BatchResult<T> = Vec<(String, Result<T>)>;

// == Set Options ==
/// Optional parameters of a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Backend to write to, default backend when `None`
    pub backend: Option<DriverKind>,
    /// Lifetime of the value, no expiry when `None`
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn with_backend(mut self, backend: DriverKind) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

// == Cache Engine ==
/// Multi-backend cache with automatic fallback, versioned TTL eviction and
/// optional change notifications.
///
/// Constructed explicitly and shared by reference; there is no global instance.
/// Every public operation validates its key before touching a backend.
///
/// A key whose last write was redirected to memory is *displaced*: until a
/// later write lands on its intended backend again, every read, removal and
/// expiry of that key is served by memory, so a stale copy left on the
/// intended backend is never returned.
pub struct CacheEngine {
    config: Arc<CacheConfig>,
    registry: DriverRegistry,
    displaced: DashMap<String, DriverKind>,
    validator: KeyValidator,
    ttl: TtlTracker,
    hub: SubscriptionHub,
    counters: CacheCounters,
}

impl CacheEngine {
    // == Constructor ==
    /// Creates an engine backed by the in-memory backend only.
    pub fn new(config: CacheConfig) -> Self {
        Self::initialize(DriverKind::Memory, config, Vec::new())
    }

    /// Creates an engine over the given backends, probing them once.
    pub fn initialize(
        requested_default: DriverKind,
        config: CacheConfig,
        drivers: Vec<Arc<dyn Driver>>,
    ) -> Self {
        let registry = DriverRegistry::initialize(requested_default, &config, drivers);
        Self {
            validator: KeyValidator::new(config.max_key_length),
            ttl: TtlTracker::new(config.enable_ttl),
            hub: SubscriptionHub::new(),
            counters: CacheCounters::new(),
            displaced: DashMap::new(),
            registry,
            config: Arc::new(config),
        }
    }

    pub fn builder(config: CacheConfig) -> CacheEngineBuilder {
        CacheEngineBuilder::new(config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    // == Set ==
    /// Stores a value on the default backend without expiry.
    pub async fn set<T: CacheCodec>(&self, key: &str, value: &T) -> Result<DriverKind> {
        self.set_with(key, value, SetOptions::default()).await
    }

    /// Stores a value and returns the backend that ended up holding it.
    ///
    /// A failed write on any backend other than memory is retried once on
    /// memory, and success there counts as success. The failing backend is
    /// held out of rotation for `backend_retry_ms` and the key stays
    /// displaced to memory until a write reaches that backend again. A
    /// failure on memory is fatal and surfaces as `BackendUnavailable`.
    pub async fn set_with<T: CacheCodec>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<DriverKind> {
        self.validator.validate(key)?;
        let encoded = value
            .encode()
            .map_err(|err| CacheError::serialization(key, err))?;

        let intended = options.backend.unwrap_or(self.registry.default_kind());
        let driver = self.registry.get_driver(options.backend);
        let previous = if self.hub.is_watching(key) {
            Some(read_text(self.route(key, &driver).as_ref(), key).await)
        } else {
            None
        };

        let stored_on = match driver.set(key, encoded.clone().into_bytes()).await {
            Ok(()) if driver.kind() == intended => {
                self.settle_displaced(key, intended).await;
                intended
            }
            Ok(()) => {
                // Resolution already redirected the write away from its backend
                if driver.kind() == DriverKind::Memory {
                    self.displace(key, intended);
                }
                driver.kind()
            }
            Err(err) if driver.kind() != DriverKind::Memory => {
                self.registry.mark_unhealthy(driver.kind());
                self.registry
                    .record_fallback(driver.kind(), DriverKind::Memory, &err.to_string());
                self.registry
                    .memory()
                    .set(key, encoded.clone().into_bytes())
                    .await
                    .map_err(|source| unavailable(key, DriverKind::Memory, source))?;
                self.displace(key, driver.kind());
                if let Err(err) = driver.remove(key).await {
                    debug!(key, backend = %driver.kind(), error = %err, "stale copy left on failing backend");
                }
                DriverKind::Memory
            }
            Err(source) => return Err(unavailable(key, driver.kind(), source)),
        };
        if stored_on == DriverKind::Memory {
            self.forget_evicted().await;
        }

        match options.ttl {
            Some(ttl) => {
                self.ttl.set(key, ttl);
            }
            None => {
                self.ttl.remove(key);
            }
        }

        debug!(key, backend = %stored_on, ttl = ?options.ttl, "cache set");

        if let Some(old_value) = previous {
            let kind = if old_value.is_some() {
                EventKind::Updated
            } else {
                EventKind::Created
            };
            self.hub.emit(key, || {
                CacheEvent::new(key, kind, Some(encoded), old_value)
            });
        }
        Ok(stored_on)
    }

    // == Get ==
    /// Reads a value from the default backend.
    pub async fn get<T: CacheCodec>(&self, key: &str) -> Result<T> {
        self.get_from(key, None).await
    }

    /// Reads and decodes a value.
    ///
    /// Fails with `TtlExpired` when the key's TTL elapsed (evicting it and
    /// emitting `Expired`), `Miss` when nothing is stored, and
    /// `SerializationFailed` when the stored text does not decode as `T`.
    pub async fn get_from<T: CacheCodec>(&self, key: &str, backend: Option<DriverKind>) -> Result<T> {
        self.validator.validate(key)?;

        if let Some(version) = self.ttl.expired_version(key) {
            if self.evict_expired(key, version, backend).await? {
                self.counters.record_miss();
                return Err(CacheError::TtlExpired(key.to_string()));
            }
            // A fresher write replaced the entry; read that value instead
        }

        let driver = self.route(key, &self.registry.get_driver(backend));
        let bytes = driver
            .get(key)
            .await
            .map_err(|source| operation_failed("get", driver.kind(), source))?;

        let Some(bytes) = bytes else {
            self.counters.record_miss();
            return Err(CacheError::Miss(key.to_string()));
        };
        self.counters.record_hit();

        let text = bytes_to_text(bytes).map_err(|err| CacheError::serialization(key, err))?;
        T::decode(&text).map_err(|err| CacheError::serialization(key, err))
    }

    /// Whether a live value exists. An expired key reports false without
    /// being evicted.
    pub async fn has(&self, key: &str, backend: Option<DriverKind>) -> Result<bool> {
        self.validator.validate(key)?;
        if self.ttl.is_expired(key) {
            return Ok(false);
        }
        let driver = self.route(key, &self.registry.get_driver(backend));
        Ok(driver.has(key).await)
    }

    /// Remaining lifetime of a key, `None` if it has no TTL.
    pub fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.validator.validate(key)?;
        Ok(self.ttl.remaining(key))
    }

    // == Remove ==
    /// Deletes a key and its TTL. Removing an absent key succeeds.
    pub async fn remove(&self, key: &str, backend: Option<DriverKind>) -> Result<()> {
        self.validator.validate(key)?;

        let driver = self.registry.get_driver(backend);
        let target = self.route(key, &driver);
        let previous = if self.hub.is_watching(key) {
            read_text(target.as_ref(), key).await
        } else {
            None
        };

        target
            .remove(key)
            .await
            .map_err(|source| operation_failed("remove", target.kind(), source))?;
        self.ttl.remove(key);

        if target.kind() != driver.kind() {
            // Displaced key: the intended backend may still hold an old copy
            match driver.remove(key).await {
                Ok(()) => {
                    self.displaced.remove(key);
                }
                Err(err) => {
                    debug!(key, backend = %driver.kind(), error = %err, "stale copy kept, key stays displaced");
                }
            }
        }

        if previous.is_some() {
            self.hub.emit(key, || {
                CacheEvent::new(key, EventKind::Removed, None, previous)
            });
        }
        Ok(())
    }

    // == Clear ==
    /// Empties one backend, dropping the TTLs of every key it held.
    ///
    /// Returns the number of keys that were stored. The `Cleared` event has an
    /// empty key and only reaches global subscribers.
    pub async fn clear(&self, backend: Option<DriverKind>) -> Result<usize> {
        let driver = self.registry.get_driver(backend);
        let keys = driver.keys().await;

        driver
            .clear()
            .await
            .map_err(|source| operation_failed("clear", driver.kind(), source))?;
        for key in &keys {
            self.ttl.remove(key);
        }
        if driver.kind() != DriverKind::Memory {
            self.clear_displaced(driver.kind()).await;
        }

        debug!(backend = %driver.kind(), cleared = keys.len(), "cache cleared");
        self.hub
            .emit("", || CacheEvent::new("", EventKind::Cleared, None, None));
        Ok(keys.len())
    }

    /// Keys currently stored on a backend, expired ones included until evicted.
    pub async fn keys(&self, backend: Option<DriverKind>) -> Vec<String> {
        self.registry.get_driver(backend).keys().await
    }

    /// Number of items stored on a backend.
    pub async fn size(&self, backend: Option<DriverKind>) -> usize {
        self.registry.get_driver(backend).len().await
    }

    // == Purge Expired ==
    /// Evicts every expired key through the same version-checked path as
    /// `get`.
    ///
    /// Reports per key whether it was evicted (`Ok(false)` when a writer
    /// refreshed it or it was already gone). A failing key keeps its TTL and
    /// does not stop the sweep.
    pub async fn purge_expired(&self, backend: Option<DriverKind>) -> BatchResult<bool> {
        let mut results = Vec::new();
        for (key, version) in self.ttl.expired() {
            let outcome = self.evict_expired(&key, version, backend).await;
            results.push((key, outcome));
        }
        let evicted = results.iter().filter(|(_, r)| matches!(r, Ok(true))).count();
        if !results.is_empty() {
            debug!(evicted, observed = results.len(), "purged expired keys");
        }
        results
    }

    // == Batch Operations ==
    /// Writes every entry independently. One failing key never aborts the rest.
    pub async fn set_multiple<K, T>(&self, entries: &[(K, T)], options: SetOptions) -> BatchResult<DriverKind>
    where
        K: AsRef<str>,
        T: CacheCodec,
    {
        let entries: Vec<(&str, &T)> = entries
            .iter()
            .map(|(key, value)| (key.as_ref(), value))
            .collect();
        self.fan_out(entries, move |(key, value)| async move {
            (key.to_string(), self.set_with(key, value, options).await)
        })
        .await
    }

    /// Reads every key independently, reporting a value or an error per key.
    pub async fn get_multiple<K, T>(&self, keys: &[K], backend: Option<DriverKind>) -> BatchResult<T>
    where
        K: AsRef<str>,
        T: CacheCodec,
    {
        let keys: Vec<&str> = keys.iter().map(|key| key.as_ref()).collect();
        self.fan_out(keys, move |key| async move {
            (key.to_string(), self.get_from::<T>(key, backend).await)
        })
        .await
    }

    /// Removes every key independently. One failing key never aborts the rest.
    pub async fn remove_multiple<K>(&self, keys: &[K], backend: Option<DriverKind>) -> BatchResult<()>
    where
        K: AsRef<str>,
    {
        let keys: Vec<&str> = keys.iter().map(|key| key.as_ref()).collect();
        self.fan_out(keys, move |key| async move {
            (key.to_string(), self.remove(key, backend).await)
        })
        .await
    }

    // == Subscriptions ==
    /// Subscribes to change events for one key.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.validator.validate(key)?;
        Ok(self.hub.subscribe(key, callback))
    }

    /// Subscribes to every change event.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hub.subscribe_all(callback)
    }

    pub fn unsubscribe(&self, subscription: &SubscriptionId) -> bool {
        self.hub.unsubscribe(subscription)
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    // == Stats ==
    /// Snapshot of backend health, item counts, configuration and counters.
    pub async fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::assemble(
            self.registry.snapshot().await,
            (*self.config).clone(),
            &self.counters,
            self.registry.fallback_count(),
            self.ttl.len(),
        )
    }

    // == Internals ==
    /// Evicts a key observed as expired at `version`.
    ///
    /// Returns false when a writer refreshed the key since the observation,
    /// in which case nothing is removed and no event fires, and also when the
    /// value is already gone from the backend, in which case only the TTL is
    /// dropped. If the backend refuses the removal the TTL entry is put back,
    /// so later reads keep treating the key as expired.
    async fn evict_expired(&self, key: &str, version: u64, backend: Option<DriverKind>) -> Result<bool> {
        let driver = self.route(key, &self.registry.get_driver(backend));
        let present = driver.has(key).await;

        let Some(entry) = self.ttl.take_if_version_matches(key, version) else {
            debug!(key, version, "stale eviction dropped, key was refreshed");
            return Ok(false);
        };
        if !present {
            debug!(key, backend = %driver.kind(), "expired key already gone, TTL dropped");
            return Ok(false);
        }

        let previous = if self.hub.is_watching(key) {
            read_text(driver.as_ref(), key).await
        } else {
            None
        };

        if let Err(source) = driver.remove(key).await {
            self.ttl.restore(entry);
            return Err(operation_failed("expire", driver.kind(), source));
        }
        self.counters.record_expiration();
        debug!(key, backend = %driver.kind(), "expired key evicted");

        self.hub.emit(key, || {
            CacheEvent::new(key, EventKind::Expired, None, previous)
        });
        Ok(true)
    }

    /// Backend actually holding `key` when `driver` was resolved for it.
    fn route(&self, key: &str, driver: &Arc<dyn Driver>) -> Arc<dyn Driver> {
        let displaced_from = self.displaced.get(key).map(|origin| *origin);
        if driver.kind() != DriverKind::Memory && displaced_from == Some(driver.kind()) {
            self.registry.memory()
        } else {
            Arc::clone(driver)
        }
    }

    fn displace(&self, key: &str, origin: DriverKind) {
        if origin != DriverKind::Memory && self.registry.is_registered(origin) {
            self.displaced.insert(key.to_string(), origin);
        }
    }

    /// A write reached `origin` again: the memory copy is no longer authoritative.
    async fn settle_displaced(&self, key: &str, origin: DriverKind) {
        if self
            .displaced
            .remove_if(key, |_, displaced_from| *displaced_from == origin)
            .is_none()
        {
            return;
        }
        if let Err(err) = self.registry.memory().remove(key).await {
            debug!(key, error = %err, "could not drop memory copy of settled key");
        }
    }

    /// Drops the memory copies of keys displaced from a backend being cleared.
    async fn clear_displaced(&self, origin: DriverKind) {
        let keys: Vec<String> = self
            .displaced
            .iter()
            .filter(|entry| *entry.value() == origin)
            .map(|entry| entry.key().clone())
            .collect();
        let memory = self.registry.memory();
        for key in keys {
            if memory.remove(&key).await.is_ok() {
                self.displaced.remove(&key);
                self.ttl.remove(&key);
            }
        }
    }

    /// Drops the TTLs of keys the memory backend evicted for capacity, unless
    /// another backend still holds a value for them.
    async fn forget_evicted(&self) {
        for key in self.registry.memory().take_evicted().await {
            let Some(version) = self.ttl.version(&key) else {
                continue;
            };
            let mut held = false;
            for driver in self.registry.drivers() {
                if driver.has(&key).await {
                    held = true;
                    break;
                }
            }
            if !held && self.ttl.remove_if_version_matches(&key, version) {
                debug!(key = %key, "dropped TTL of key evicted for capacity");
            }
        }
    }

    /// Runs one operation per item, concurrently when batching is enabled and
    /// one after another otherwise. Output order matches input order.
    async fn fan_out<I, R, F, Fut>(&self, items: Vec<I>, op: F) -> Vec<R>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = R>,
    {
        if self.config.enable_batching {
            return join_all(items.into_iter().map(op)).await;
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(op(item).await);
        }
        results
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("tracked_ttls", &self.ttl.len())
            .field("hub", &self.hub)
            .finish()
    }
}

// == Builder ==
/// Assembles a [`CacheEngine`] from a configuration and a set of backends.
pub struct CacheEngineBuilder {
    config: CacheConfig,
    default_driver: DriverKind,
    drivers: Vec<Arc<dyn Driver>>,
}

impl CacheEngineBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            default_driver: DriverKind::Memory,
            drivers: Vec::new(),
        }
    }

    /// Backend to prefer as default if it is healthy at startup.
    pub fn default_driver(mut self, kind: DriverKind) -> Self {
        self.default_driver = kind;
        self
    }

    /// Registers a backend owned by the engine.
    pub fn with_driver<D: Driver>(self, driver: D) -> Self {
        self.with_shared_driver(Arc::new(driver))
    }

    /// Registers a backend the caller keeps a handle to.
    pub fn with_shared_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn build(self) -> CacheEngine {
        CacheEngine::initialize(self.default_driver, self.config, self.drivers)
    }
}

/// Reads the current text of a key for event payloads. Failures read as absent.
async fn read_text(driver: &dyn Driver, key: &str) -> Option<String> {
    let bytes = driver.get(key).await.ok().flatten()?;
    String::from_utf8(bytes).ok()
}

fn unavailable(key: &str, kind: DriverKind, source: DriverError) -> CacheError {
    CacheError::BackendUnavailable {
        key: key.to_string(),
        kind,
        source,
    }
}

fn operation_failed(operation: &'static str, kind: DriverKind, source: DriverError) -> CacheError {
    CacheError::OperationFailed {
        operation,
        kind,
        source,
    }
}
