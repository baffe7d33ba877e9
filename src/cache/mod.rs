//! Cache Module
//!
//! The engine facade and the leaves it orchestrates: key validation,
//! value codecs, TTL tracking and operation statistics.

pub mod codec;
mod engine;
mod key;
mod stats;
mod ttl;


// Re-export public types
pub use codec::{decode_json, encode_json, CacheCodec, CodecError, CodecResult, Json};
pub use engine::{BatchResult, CacheEngine, CacheEngineBuilder, SetOptions};
pub use key::KeyValidator;
pub use stats::{CacheCounters, StatsSnapshot};
pub use ttl::{TtlEntry, TtlTracker};

// == Public Constants ==
/// Prefix reserved for TTL side-keys kept by backends.
pub const RESERVED_KEY_PREFIX: &str = "__ttl__:";

/// Suffix reserved for TTL side-keys kept by backends.
pub const RESERVED_KEY_SUFFIX: &str = ":__ttl__";
