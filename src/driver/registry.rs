//! Driver Registry Module
//!
//! Backend discovery, health tracking, default selection and fallback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::driver::{Driver, DriverDescriptor, DriverKind, MemoryDriver};

// == Registry Snapshot ==
/// Observability view of the registry. Never used for decisions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub default_driver: String,
    pub health: BTreeMap<DriverKind, bool>,
    pub item_counts: BTreeMap<DriverKind, usize>,
}

// == Driver Registry ==
/// Owns every registered backend and decides which one serves a request.
///
/// The memory backend is always registered and always healthy, so resolution
/// can never come back empty-handed.
pub struct DriverRegistry {
    drivers: BTreeMap<DriverKind, Arc<dyn Driver>>,
    memory: Arc<dyn Driver>,
    health: RwLock<BTreeMap<DriverKind, bool>>,
    suspended: RwLock<BTreeMap<DriverKind, Instant>>,
    retry_after: Duration,
    default_kind: DriverKind,
    log_fallbacks: bool,
    fallbacks: AtomicU64,
}

impl DriverRegistry {
    // == Initialize ==
    /// Probes every supplied backend once and picks the default.
    ///
    /// Default resolution order: the requested kind if healthy, then the first
    /// healthy persistent-class backend, then memory. A memory driver supplied
    /// by the caller replaces the built-in one; otherwise one is constructed
    /// with `max_items_per_backend` capacity.
    pub fn initialize(
        requested_default: DriverKind,
        config: &CacheConfig,
        drivers: Vec<Arc<dyn Driver>>,
    ) -> Self {
        let mut registered: BTreeMap<DriverKind, Arc<dyn Driver>> = BTreeMap::new();
        for driver in drivers {
            let kind = driver.kind();
            if registered.insert(kind, driver).is_some() {
                warn!(backend = %kind, "duplicate backend registered, keeping the last one");
            }
        }

        let memory = registered
            .entry(DriverKind::Memory)
            .or_insert_with(|| {
                Arc::new(MemoryDriver::new(config.max_items_per_backend)) as Arc<dyn Driver>
            })
            .clone();

        let mut health = BTreeMap::new();
        for (kind, driver) in &registered {
            // Memory is healthy by definition, whatever it reports
            let available = *kind == DriverKind::Memory || driver.is_available();
            health.insert(*kind, available);
        }

        let is_healthy = |kind: DriverKind| health.get(&kind).copied().unwrap_or(false);
        let default_kind = if is_healthy(requested_default) {
            requested_default
        } else {
            DriverKind::ALL
                .into_iter()
                .find(|kind| kind.is_persistent_class() && is_healthy(*kind))
                .unwrap_or(DriverKind::Memory)
        };

        info!(
            requested = %requested_default,
            default = %default_kind,
            health = ?health,
            "driver registry initialized"
        );
        if default_kind != requested_default && config.log_fallbacks {
            warn!(
                requested = %requested_default,
                fallback = %default_kind,
                "requested default backend unavailable, falling back"
            );
        }

        Self {
            drivers: registered,
            memory,
            health: RwLock::new(health),
            suspended: RwLock::new(BTreeMap::new()),
            retry_after: Duration::from_millis(config.backend_retry_ms),
            default_kind,
            log_fallbacks: config.log_fallbacks,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Kind chosen as default at initialisation.
    pub fn default_kind(&self) -> DriverKind {
        self.default_kind
    }

    /// The always-available in-memory backend.
    pub fn memory(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.memory)
    }

    // == Get Driver ==
    /// Resolves the backend for a request, never returning an unhealthy one.
    ///
    /// `None` asks for the default. An unknown or unhealthy requested kind
    /// falls back to the default, and an unhealthy default falls back to memory.
    pub fn get_driver(&self, requested: Option<DriverKind>) -> Arc<dyn Driver> {
        let wanted = requested.unwrap_or(self.default_kind);
        if let Some(driver) = self.healthy(wanted) {
            return driver;
        }

        let fallback = if wanted != self.default_kind {
            self.healthy(self.default_kind)
                .unwrap_or_else(|| self.memory())
        } else {
            self.memory()
        };
        self.record_fallback(wanted, fallback.kind(), "backend unavailable");
        fallback
    }

    /// Records a write that had to be redirected to another backend.
    pub fn record_fallback(&self, from: DriverKind, to: DriverKind, reason: &str) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        if self.log_fallbacks {
            warn!(from = %from, to = %to, reason, "cache backend fallback");
        }
    }

    /// Takes a backend out of rotation after a failed write.
    ///
    /// The backend is treated as unhealthy without being probed until
    /// `backend_retry_ms` has elapsed, then re-probed lazily as usual.
    pub fn mark_unhealthy(&self, kind: DriverKind) {
        if kind == DriverKind::Memory {
            return;
        }
        self.health.write().insert(kind, false);
        let until = Instant::now().checked_add(self.retry_after);
        if let Some(until) = until {
            self.suspended.write().insert(kind, until);
        }
        debug!(backend = %kind, retry_after = ?self.retry_after, "backend suspended");
    }

    /// Whether a backend is currently held out of rotation.
    pub fn is_suspended(&self, kind: DriverKind) -> bool {
        let now = Instant::now();
        let expired = match self.suspended.read().get(&kind) {
            Some(until) if now < *until => return true,
            Some(_) => true,
            None => false,
        };
        if expired {
            self.suspended.write().remove(&kind);
        }
        false
    }

    /// Number of fallbacks taken since initialisation.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Last observed health per registered backend.
    pub fn descriptors(&self) -> Vec<DriverDescriptor> {
        self.health
            .read()
            .iter()
            .map(|(kind, available)| DriverDescriptor {
                kind: *kind,
                is_available: *available,
            })
            .collect()
    }

    pub fn is_registered(&self, kind: DriverKind) -> bool {
        self.drivers.contains_key(&kind)
    }

    /// Every registered backend.
    pub fn drivers(&self) -> impl Iterator<Item = &Arc<dyn Driver>> {
        self.drivers.values()
    }

    // == Get Stats ==
    /// Default backend name, per-backend health and item counts.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let mut item_counts = BTreeMap::new();
        for (kind, driver) in &self.drivers {
            self.probe(*kind, driver.as_ref());
            item_counts.insert(*kind, driver.len().await);
        }

        RegistrySnapshot {
            default_driver: self.default_kind.name().to_string(),
            health: self.health.read().clone(),
            item_counts,
        }
    }

    /// Re-evaluates the health of one backend and returns it if healthy.
    fn healthy(&self, kind: DriverKind) -> Option<Arc<dyn Driver>> {
        let driver = self.drivers.get(&kind)?;
        self.probe(kind, driver.as_ref()).then(|| Arc::clone(driver))
    }

    fn probe(&self, kind: DriverKind, driver: &dyn Driver) -> bool {
        let available = kind == DriverKind::Memory
            || (!self.is_suspended(kind) && driver.is_available());
        self.health.write().insert(kind, available);
        available
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("default_kind", &self.default_kind)
            .field("health", &*self.health.read())
            .finish_non_exhaustive()
    }
}
