//! Tiered Cache - A multi-backend caching engine
//!
//! Selects among storage backends, falls back to memory when a backend fails,
//! tracks per-key expiry with versioned eviction and notifies subscribers of
//! state changes.

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;

pub use cache::{CacheCodec, CacheEngine, CacheEngineBuilder, Json, SetOptions, StatsSnapshot};
pub use config::CacheConfig;
pub use driver::{Driver, DriverDescriptor, DriverKind, DriverRegistry, MemoryDriver};
pub use error::{CacheError, CacheErrorKind, DriverError, Result};
pub use events::{CacheEvent, EventKind, SubscriptionId};
