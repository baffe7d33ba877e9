//! Key Validation Module
//!
//! Structural checks run before any key reaches a backend.

use crate::cache::{RESERVED_KEY_PREFIX, RESERVED_KEY_SUFFIX};
use crate::error::{CacheError, Result};

const LINE_BREAKS: [char; 5] = ['\n', '\r', '\u{0085}', '\u{2028}', '\u{2029}'];

// == Key Validator ==
/// Rejects keys that are empty, too long, contain a line break, or collide
/// with the namespace reserved for TTL side-keys.
#[derive(Debug, Clone, Copy)]
pub struct KeyValidator {
    max_key_length: usize,
}

impl KeyValidator {
    pub fn new(max_key_length: usize) -> Self {
        Self { max_key_length }
    }

    // == Validate ==
    /// Returns `KeyInvalid` describing the first rule the key breaks.
    ///
    /// Length is counted in characters, not bytes.
    pub fn validate(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::key_invalid(key, "key cannot be empty"));
        }

        let length = key.chars().count();
        if length > self.max_key_length {
            return Err(CacheError::key_invalid(
                key,
                format!(
                    "key length {} exceeds maximum of {}",
                    length, self.max_key_length
                ),
            ));
        }

        if key.contains(LINE_BREAKS) {
            return Err(CacheError::key_invalid(key, "key contains a line break"));
        }

        if key.starts_with(RESERVED_KEY_PREFIX) || key.ends_with(RESERVED_KEY_SUFFIX) {
            return Err(CacheError::key_invalid(
                key,
                "key uses the reserved TTL namespace",
            ));
        }

        Ok(())
    }
}
