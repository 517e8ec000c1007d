use thiserror::Error;

pub mod decoder;
pub mod encoder;

/// A decoded bencode value.
///
/// Bencode has four kinds: byte strings, integers, lists, and dictionaries.
/// Byte strings stay raw `Vec<u8>` because they are binary-safe on the wire
/// (the `pieces` blob is concatenated SHA-1 digests, not text). Dictionaries
/// keep the order they were decoded in; see [`Dictionary`].
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(Dictionary),
}

impl BencodeValue {
    /// Renders the value as JSON for display. Byte strings are converted
    /// lossily; binary blobs come out mangled but printable.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BencodeValue::String(bytes) => {
                serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            BencodeValue::Integer(i) => serde_json::Value::from(*i),
            BencodeValue::List(items) => {
                serde_json::Value::Array(items.iter().map(BencodeValue::to_json).collect())
            }
            BencodeValue::Dict(dict) => serde_json::Value::Object(
                dict.entries()
                    .iter()
                    .map(|(key, value)| {
                        (String::from_utf8_lossy(key).into_owned(), value.to_json())
                    })
                    .collect(),
            ),
        }
    }
}

/// A string-keyed mapping that preserves insertion order.
///
/// The infohash is SHA-1 over the `info` dictionary exactly as it appeared
/// in the metainfo, so the entry order observed while decoding must survive
/// re-encoding. A pair list keeps that order; lookups are linear, which is
/// fine for the handful of keys a metainfo carries.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Dictionary(Vec<(Vec<u8>, BencodeValue)>);

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. A repeated key replaces the earlier value in place,
    /// keeping its original position.
    pub fn insert(&mut self, key: Vec<u8>, value: BencodeValue) {
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Entries in decoded order.
    pub fn entries(&self) -> &[(Vec<u8>, BencodeValue)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Custom error type for bencode operations.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid bencode format: {0}")]
    InvalidFormat(String),

    #[error("Invalid integer format")]
    InvalidInteger,

    #[error("Invalid string length")]
    InvalidStringLength,

    #[error("Unexpected end of input")]
    UnexpectedEOI,

    #[error("Dictionary keys must be strings")]
    DictKeyNotString,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
