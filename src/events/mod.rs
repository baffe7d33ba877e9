//! Events Module
//!
//! State-change events and the hub that fans them out to subscribers.

mod hub;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheCodec, CodecResult};

pub use hub::{Subscriber, SubscriptionHub, SubscriptionId};

// == Event Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Created,
    Updated,
    Removed,
    Expired,
    Cleared,
}

// == Cache Event ==
/// One state change. Built once, shared by reference with every subscriber,
/// never persisted.
///
/// Values are carried in their encoded text form; use
/// [`decode_new`](Self::decode_new) / [`decode_old`](Self::decode_old) to get
/// typed values back. `Cleared` events carry an empty key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEvent {
    pub key: String,
    pub kind: EventKind,
    pub new_value: Option<String>,
    pub old_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CacheEvent {
    pub fn new(
        key: impl Into<String>,
        kind: EventKind,
        new_value: Option<String>,
        old_value: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            new_value,
            old_value,
            timestamp: Utc::now(),
        }
    }

    pub fn decode_new<T: CacheCodec>(&self) -> Option<CodecResult<T>> {
        self.new_value.as_deref().map(T::decode)
    }

    pub fn decode_old<T: CacheCodec>(&self) -> Option<CodecResult<T>> {
        self.old_value.as_deref().map(T::decode)
    }
}
