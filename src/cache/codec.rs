//! Codec Module
//!
//! Type-directed encoding of cached values to and from text.
//!
//! Strings pass through untouched, numeric and boolean primitives use their
//! canonical string form, and structured data (sequences, string-keyed maps,
//! `serde_json::Value`) is stored as JSON. Any other type opts in explicitly,
//! usually with [`json_codec!`](crate::json_codec) or the [`Json`] wrapper,
//! so a value without a codec is rejected at compile time.

use std::collections::{BTreeMap, HashMap};
use std::string::FromUtf8Error;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// == Codec Error ==
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot parse {raw:?} as {type_name}")]
    Parse {
        type_name: &'static str,
        raw: String,
    },

    #[error("stored bytes are not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

// == Codec Trait ==
/// Conversion between a value and its stored text form.
pub trait CacheCodec: Sized {
    fn encode(&self) -> CodecResult<String>;

    fn decode(raw: &str) -> CodecResult<Self>;
}

/// Encodes any serde type as JSON text.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> CodecResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes JSON text into any serde type.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> CodecResult<T> {
    Ok(serde_json::from_str(raw)?)
}

/// Turns stored bytes back into the text a codec expects.
pub fn bytes_to_text(bytes: Vec<u8>) -> CodecResult<String> {
    Ok(String::from_utf8(bytes)?)
}

// == Implementations ==
impl CacheCodec for String {
    fn encode(&self) -> CodecResult<String> {
        Ok(self.clone())
    }

    fn decode(raw: &str) -> CodecResult<Self> {
        Ok(raw.to_string())
    }
}

macro_rules! primitive_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl CacheCodec for $ty {
                fn encode(&self) -> CodecResult<String> {
                    Ok(self.to_string())
                }

                fn decode(raw: &str) -> CodecResult<Self> {
                    raw.parse().map_err(|_| CodecError::Parse {
                        type_name: stringify!($ty),
                        raw: raw.to_string(),
                    })
                }
            }
        )+
    };
}

primitive_codec!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char);

impl CacheCodec for serde_json::Value {
    fn encode(&self) -> CodecResult<String> {
        encode_json(self)
    }

    fn decode(raw: &str) -> CodecResult<Self> {
        decode_json(raw)
    }
}

impl<T: Serialize + DeserializeOwned> CacheCodec for Vec<T> {
    fn encode(&self) -> CodecResult<String> {
        encode_json(self)
    }

    fn decode(raw: &str) -> CodecResult<Self> {
        decode_json(raw)
    }
}

impl<V: Serialize + DeserializeOwned> CacheCodec for BTreeMap<String, V> {
    fn encode(&self) -> CodecResult<String> {
        encode_json(self)
    }

    fn decode(raw: &str) -> CodecResult<Self> {
        decode_json(raw)
    }
}

impl<V: Serialize + DeserializeOwned> CacheCodec for HashMap<String, V> {
    fn encode(&self) -> CodecResult<String> {
        encode_json(self)
    }

    fn decode(raw: &str) -> CodecResult<Self> {
        decode_json(raw)
    }
}

// == Json Wrapper ==
/// Stores any serde type as JSON without a dedicated codec impl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T: Serialize + DeserializeOwned> CacheCodec for Json<T> {
    fn encode(&self) -> CodecResult<String> {
        encode_json(&self.0)
    }

    fn decode(raw: &str) -> CodecResult<Self> {
        decode_json(raw).map(Json)
    }
}

/// Implements [`CacheCodec`](crate::cache::CacheCodec) through JSON for
/// user types that derive `Serialize` and `Deserialize`.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Profile { name: String }
///
/// tiered_cache::json_codec!(Profile);
/// ```
#[macro_export]
macro_rules! json_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::cache::CacheCodec for $ty {
                fn encode(&self) -> $crate::cache::CodecResult<String> {
                    $crate::cache::encode_json(self)
                }

                fn decode(raw: &str) -> $crate::cache::CodecResult<Self> {
                    $crate::cache::decode_json(raw)
                }
            }
        )+
    };
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    crate::json_codec!(Profile);

    #[test]
    fn test_string_passes_through() {
        assert_eq!("hello".to_string().encode().unwrap(), "hello");
        assert_eq!(String::decode("{\"not\":\"parsed\"}").unwrap(), "{\"not\":\"parsed\"}");
    }

    #[test]
    fn test_primitives_stringify() {
        assert_eq!(42i64.encode().unwrap(), "42");
        assert_eq!(true.encode().unwrap(), "true");
        assert_eq!(2.5f64.encode().unwrap(), "2.5");
        assert_eq!(u8::decode("255").unwrap(), 255);
        assert!(!bool::decode("false").unwrap());
    }

    #[test]
    fn test_primitive_decode_mismatch() {
        let err = i32::decode("forty-two").unwrap_err();
        assert!(matches!(err, CodecError::Parse { type_name: "i32", .. }));
        assert!(u8::decode("256").is_err());
    }

    #[test]
    fn test_structured_data_is_json() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), "a".to_string());
        assert_eq!(map.encode().unwrap(), r#"{"name":"a"}"#);
        assert_eq!(vec![1, 2, 3].encode().unwrap(), "[1,2,3]");
        assert_eq!(
            serde_json::Value::decode(r#"{"k":[true]}"#).unwrap(),
            json!({"k": [true]})
        );
    }

    #[test]
    fn test_user_type_codec() {
        let profile = Profile {
            name: "a".into(),
            age: 7,
        };
        let raw = profile.encode().unwrap();
        assert_eq!(Profile::decode(&raw).unwrap(), profile);
        assert!(matches!(Profile::decode("[1]"), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_json_wrapper() {
        let wrapped = Json((1u8, "two".to_string()));
        assert_eq!(wrapped.encode().unwrap(), r#"[1,"two"]"#);
    }

    #[test]
    fn test_bytes_to_text_rejects_invalid_utf8() {
        assert!(matches!(
            bytes_to_text(vec![0xff, 0xfe]),
            Err(CodecError::Utf8(_))
        ));
    }
}
