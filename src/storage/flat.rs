//! Key/value store over a flat byte region.
//!
//! Keeps every entry in an in-memory cache. Reads never touch the region;
//! writes only mark the cache dirty. [`commit`](Store::commit) encodes the
//! whole cache with [`record::encode`] and writes it in one pass, or not at
//! all when the image would not fit.
//!
//! # Example
//!
//! ```
//! use ionconnect_esp32::storage::{FlatStore, MemoryRegion, Store};
//!
//! let mut store = FlatStore::new(MemoryRegion::new(512));
//! store.begin("ionconnect").unwrap();
//! store.put_string("wifi_ssid", "HomeNet").unwrap();
//! store.commit().unwrap();
//!
//! let region = store.into_region();
//! let mut reopened = FlatStore::new(region);
//! reopened.begin("ionconnect").unwrap();
//! assert_eq!(reopened.get_string("wifi_ssid").as_deref(), Some("HomeNet"));
//! ```

use super::record;
use super::{validate_key, FlashRegion, Store, StoreError, StoreValue, MAX_KEY_LEN};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Default region size, matching a 4 KiB emulated EEPROM sector.
pub const DEFAULT_REGION_SIZE: usize = 4096;

/// Flat-region backend.
pub struct FlatStore<R: FlashRegion> {
    region: R,
    namespace: String,
    cache: BTreeMap<String, StoreValue>,
    initialized: bool,
    dirty: bool,
}

impl<R: FlashRegion> FlatStore<R> {
    /// Wrap a region. Call [`Store::begin`] before use.
    pub fn new(region: R) -> Self {
        Self {
            region,
            namespace: String::new(),
            cache: BTreeMap::new(),
            initialized: false,
            dirty: false,
        }
    }

    /// Borrow the underlying region.
    pub fn region(&self) -> &R {
        &self.region
    }

    /// Mutably borrow the underlying region.
    pub fn region_mut(&mut self) -> &mut R {
        &mut self.region
    }

    /// Consume the store, returning the region. Uncommitted writes are lost.
    pub fn into_region(self) -> R {
        self.region
    }

    /// Whether there are writes not yet committed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Size the current cache would occupy once committed.
    pub fn encoded_len(&self) -> usize {
        record::header_len(&self.namespace)
            + self
                .cache
                .iter()
                .map(|(k, v)| record::record_len(k, v))
                .sum::<usize>()
    }

    fn get(&self, key: &str) -> Option<&StoreValue> {
        if !self.initialized {
            return None;
        }
        self.cache.get(key)
    }

    fn put(&mut self, key: &str, value: StoreValue) -> Result<(), StoreError> {
        if !self.initialized {
            return Err(StoreError::NotInitialized);
        }
        validate_key(key, MAX_KEY_LEN)?;
        if let StoreValue::String(s) = &value {
            if s.len() > record::MAX_DATA_LEN {
                return Err(StoreError::ValueTooLarge {
                    key: key.to_string(),
                    len: s.len(),
                    max: record::MAX_DATA_LEN,
                });
            }
        }
        self.cache.insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn write_image(&mut self) -> Result<(), StoreError> {
        let image = record::encode(&self.namespace, &self.cache)?;
        let capacity = self.region.capacity();
        if image.len() > capacity {
            warn!(
                "Store commit rejected: {} bytes needed, region holds {}",
                image.len(),
                capacity
            );
            return Err(StoreError::CapacityExceeded {
                needed: image.len(),
                capacity,
            });
        }
        self.region.write(&image)?;
        debug!("Committed {} entries ({} bytes)", self.cache.len(), image.len());
        Ok(())
    }
}

impl<R: FlashRegion> Store for FlatStore<R> {
    fn begin(&mut self, namespace: &str) -> Result<(), StoreError> {
        if self.initialized && self.namespace == namespace {
            return Ok(());
        }
        if namespace.is_empty() || namespace.len() > record::MAX_NAMESPACE_LEN {
            return Err(StoreError::InvalidNamespace(namespace.to_string()));
        }

        self.namespace = namespace.to_string();
        let image = self.region.read()?;
        match record::decode(&image, namespace) {
            Ok(entries) => {
                debug!("Loaded {} entries from region", entries.len());
                self.cache = entries;
                self.dirty = false;
            }
            Err(reason) => {
                info!("Initializing empty store region ({})", reason);
                self.cache.clear();
                self.write_image()?;
                self.dirty = false;
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn end(&mut self) {
        if self.initialized && self.dirty {
            if let Err(e) = self.commit() {
                warn!("Dropping uncommitted store changes: {}", e);
            }
        }
        self.initialized = false;
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        if !self.initialized {
            return Err(StoreError::NotInitialized);
        }
        self.cache.clear();
        self.dirty = true;
        self.commit()
    }

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)?.as_string()
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.put(key, StoreValue::String(value.to_string()))
    }

    fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key)?.as_int()
    }

    fn put_int(&mut self, key: &str, value: i32) -> Result<(), StoreError> {
        self.put(key, StoreValue::Int(value))
    }

    fn get_uint(&self, key: &str) -> Option<u32> {
        self.get(key)?.as_uint()
    }

    fn put_uint(&mut self, key: &str, value: u32) -> Result<(), StoreError> {
        self.put(key, StoreValue::UInt(value))
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    fn put_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError> {
        self.put(key, StoreValue::Bool(value))
    }

    fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        if !self.initialized {
            return Err(StoreError::NotInitialized);
        }
        let existed = self.cache.remove(key).is_some();
        if existed {
            self.dirty = true;
        }
        Ok(existed)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.initialized {
            return Err(StoreError::NotInitialized);
        }
        if !self.dirty {
            return Ok(());
        }
        self.write_image()?;
        self.dirty = false;
        Ok(())
    }
}
