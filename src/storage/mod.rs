//! Persistent key/value storage.
//!
//! One [`Store`] contract, two kinds of backend:
//!
//! - **Structured service** - the platform's own key/value store, where writes
//!   are durable immediately and `commit` is a no-op:
//!   [`NvsStore`] on ESP32, [`HostKvStore`] on a development host.
//! - **Flat region** - [`FlatStore`], a write-through cache over a fixed-size
//!   byte region ([`FlashRegion`]) using the tagged-record encoding in
//!   [`record`]. `commit` rewrites the whole image in one pass.
//!
//! The backend is chosen at build time through [`DefaultStore`]; everything
//! above this layer is generic over `S: Store`.

mod flat;
#[cfg(not(feature = "esp32"))]
mod host_kv;
#[cfg(feature = "esp32")]
mod nvs;
pub mod record;
mod region;

pub use flat::{FlatStore, DEFAULT_REGION_SIZE};
#[cfg(not(feature = "esp32"))]
pub use host_kv::HostKvStore;
#[cfg(feature = "esp32")]
pub use nvs::NvsStore;
#[cfg(not(feature = "esp32"))]
pub use region::FileRegion;
pub use region::{FlashRegion, MemoryRegion};

use std::fmt;

/// Default namespace used by the configuration engine.
pub const DEFAULT_NAMESPACE: &str = "ionconnect";

/// Maximum key length accepted by every backend.
pub const MAX_KEY_LEN: usize = 255;

/// Store backend selected for this build.
#[cfg(feature = "esp32")]
pub type DefaultStore = NvsStore;

/// Store backend selected for this build.
#[cfg(all(not(feature = "esp32"), feature = "flat-store"))]
pub type DefaultStore = FlatStore<FileRegion>;

/// Store backend selected for this build.
#[cfg(all(not(feature = "esp32"), not(feature = "flat-store")))]
pub type DefaultStore = HostKvStore;

/// Open the build's default backend at its default location.
///
/// The store still needs [`Store::begin`] before use.
#[cfg(feature = "esp32")]
pub fn open_default() -> Result<DefaultStore, StoreError> {
    NvsStore::take()
}

/// Open the build's default backend at its default location.
///
/// The store still needs [`Store::begin`] before use.
#[cfg(all(not(feature = "esp32"), feature = "flat-store"))]
pub fn open_default() -> Result<DefaultStore, StoreError> {
    let region = FileRegion::default_location(DEFAULT_REGION_SIZE)?;
    Ok(FlatStore::new(region))
}

/// Open the build's default backend at its default location.
///
/// The store still needs [`Store::begin`] before use.
#[cfg(all(not(feature = "esp32"), not(feature = "flat-store")))]
pub fn open_default() -> Result<DefaultStore, StoreError> {
    HostKvStore::default_location()
}

/// Persistent key/value store.
///
/// All backends behave identically from the caller's point of view, except
/// for durability: callers must call [`commit`](Store::commit) and check its
/// result before assuming a write survives a reboot.
pub trait Store {
    /// Open (or switch to) a namespace. Must be called before anything else.
    fn begin(&mut self, namespace: &str) -> Result<(), StoreError>;

    /// Close the namespace, flushing pending writes where the backend buffers.
    fn end(&mut self);

    /// Remove every key in the namespace, durably.
    fn clear(&mut self) -> Result<(), StoreError>;

    /// Whether `key` holds a value of any type.
    fn exists(&self, key: &str) -> bool;

    /// Read a string value.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Write a string value.
    fn put_string(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Read a signed integer value.
    fn get_int(&self, key: &str) -> Option<i32>;

    /// Write a signed integer value.
    fn put_int(&mut self, key: &str, value: i32) -> Result<(), StoreError>;

    /// Read an unsigned integer value.
    fn get_uint(&self, key: &str) -> Option<u32>;

    /// Write an unsigned integer value.
    fn put_uint(&mut self, key: &str, value: u32) -> Result<(), StoreError>;

    /// Read a boolean value.
    fn get_bool(&self, key: &str) -> Option<bool>;

    /// Write a boolean value.
    fn put_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError>;

    /// Remove a key. Returns whether it existed.
    fn remove(&mut self, key: &str) -> Result<bool, StoreError>;

    /// Make all previous writes durable.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Read a string, falling back to `default`.
    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    /// Read a signed integer, falling back to `default`.
    fn get_int_or(&self, key: &str, default: i32) -> i32 {
        self.get_int(key).unwrap_or(default)
    }

    /// Read an unsigned integer, falling back to `default`.
    fn get_uint_or(&self, key: &str, default: u32) -> u32 {
        self.get_uint(key).unwrap_or(default)
    }

    /// Read a boolean, falling back to `default`.
    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}

/// Type tag of a stored value. The discriminants are the on-flash tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueKind {
    String = 1,
    Int = 2,
    UInt = 3,
    Bool = 4,
}

impl ValueKind {
    /// Decode an on-flash type tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::String),
            2 => Some(Self::Int),
            3 => Some(Self::UInt),
            4 => Some(Self::Bool),
            _ => None,
        }
    }
}

/// A typed stored value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StoreValue {
    String(String),
    Int(i32),
    UInt(u32),
    Bool(bool),
}

impl StoreValue {
    /// Type tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Int(_) => ValueKind::Int,
            Self::UInt(_) => ValueKind::UInt,
            Self::Bool(_) => ValueKind::Bool,
        }
    }

    fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn as_uint(&self) -> Option<u32> {
        match self {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Check a key against the limits shared by all backends.
pub(crate) fn validate_key(key: &str, max_len: usize) -> Result<(), StoreError> {
    if key.is_empty() || key.len() > max_len {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
            max: max_len,
        });
    }
    Ok(())
}

/// Errors from the persistent store.
#[derive(Debug)]
pub enum StoreError {
    /// `begin` has not been called (or `end` was called).
    NotInitialized,
    /// Key is empty or longer than the backend allows.
    InvalidKey { key: String, max: usize },
    /// Namespace is empty or longer than the backend allows.
    InvalidNamespace(String),
    /// Value is too large for the record format.
    ValueTooLarge { key: String, len: usize, max: usize },
    /// Encoded image does not fit the region. Nothing was written.
    CapacityExceeded { needed: usize, capacity: usize },
    /// Underlying file or flash I/O failed.
    Io(std::io::Error),
    /// Stored data could not be serialized.
    Serialize(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "store not initialized"),
            Self::InvalidKey { key, max } => {
                write!(f, "invalid key {:?} (must be 1-{} bytes)", key, max)
            }
            Self::InvalidNamespace(ns) => write!(f, "invalid namespace {:?}", ns),
            Self::ValueTooLarge { key, len, max } => {
                write!(f, "value for {:?} too large: {} bytes (max {})", key, len, max)
            }
            Self::CapacityExceeded { needed, capacity } => write!(
                f,
                "store image needs {} bytes but region holds {}",
                needed, capacity
            ),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Serialize(msg) => write!(f, "serialization failed: {}", msg),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StoreError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_tags() {
        for kind in [ValueKind::String, ValueKind::Int, ValueKind::UInt, ValueKind::Bool] {
            assert_eq!(ValueKind::from_tag(kind as u8), Some(kind));
        }
        assert_eq!(ValueKind::from_tag(0), None);
        assert_eq!(ValueKind::from_tag(5), None);
    }

    #[test]
    fn test_store_value_kind() {
        assert_eq!(StoreValue::String("x".into()).kind(), ValueKind::String);
        assert_eq!(StoreValue::Int(-1).kind(), ValueKind::Int);
        assert_eq!(StoreValue::UInt(1).kind(), ValueKind::UInt);
        assert_eq!(StoreValue::Bool(true).kind(), ValueKind::Bool);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("config_data", MAX_KEY_LEN).is_ok());
        assert!(matches!(
            validate_key("", MAX_KEY_LEN),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(validate_key(&"k".repeat(255), MAX_KEY_LEN).is_ok());
        assert!(validate_key(&"k".repeat(256), MAX_KEY_LEN).is_err());
        assert!(validate_key("sixteen_chars_xx", 15).is_err());
    }

    #[test]
    fn test_error_display() {
        let e = StoreError::CapacityExceeded {
            needed: 5000,
            capacity: 4096,
        };
        assert_eq!(
            e.to_string(),
            "store image needs 5000 bytes but region holds 4096"
        );
    }
}
