//! Driver Module
//!
//! The storage contract every backend satisfies, the always-available memory
//! backend and the registry that selects between backends.
//!
//! The engine only ever talks to backends through [`Driver`]; nothing outside
//! the registry branches on which backend it is dealing with.

mod lru;
mod memory;
mod registry;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverResult;

pub use lru::LruTracker;
pub use memory::MemoryDriver;
pub use registry::{DriverRegistry, RegistrySnapshot};

// == Driver Kind ==
/// Class of a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DriverKind {
    /// Process-local map, never fails
    Memory,
    /// Durable key-value store
    Persistent,
    /// Encrypted store
    Secure,
}

impl DriverKind {
    /// All kinds in probe order.
    pub const ALL: [DriverKind; 3] = [DriverKind::Memory, DriverKind::Persistent, DriverKind::Secure];

    /// Whether this kind survives process restarts.
    pub fn is_persistent_class(self) -> bool {
        matches!(self, DriverKind::Persistent | DriverKind::Secure)
    }

    pub fn name(self) -> &'static str {
        match self {
            DriverKind::Memory => "Memory",
            DriverKind::Persistent => "Persistent",
            DriverKind::Secure => "Secure",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// == Driver Descriptor ==
/// Last observed health of a registered backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDescriptor {
    pub kind: DriverKind,
    pub is_available: bool,
}

// == Driver Trait ==
/// Uniform read/write/enumerate interface over a storage backend.
///
/// A backend whose [`is_available`](Driver::is_available) returns false must
/// refuse writes with [`DriverError::Unavailable`](crate::error::DriverError::Unavailable)
/// instead of silently dropping them.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Backend class, used by the registry for selection.
    fn kind(&self) -> DriverKind;

    /// Current health. Re-checked by the registry on every resolution.
    fn is_available(&self) -> bool;

    async fn set(&self, key: &str, value: Vec<u8>) -> DriverResult<()>;

    async fn get(&self, key: &str) -> DriverResult<Option<Vec<u8>>>;

    async fn has(&self, key: &str) -> bool;

    async fn remove(&self, key: &str) -> DriverResult<()>;

    async fn clear(&self) -> DriverResult<()>;

    async fn keys(&self) -> Vec<String>;

    /// Number of stored items.
    async fn len(&self) -> usize {
        self.keys().await.len()
    }

    /// Drains the keys this backend dropped on its own since the last call,
    /// such as capacity evictions. Backends that never drop keys report none.
    async fn take_evicted(&self) -> Vec<String> {
        Vec::new()
    }
}
