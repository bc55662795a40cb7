//! NVS-backed store for ESP32.
//!
//! Every setter goes straight to the NVS partition, so values persist across
//! reboots without an explicit commit.

use super::{validate_key, Store, StoreError};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::{debug, warn};

/// NVS key length limit (15 characters plus terminator).
pub const NVS_MAX_KEY_LEN: usize = 15;

/// NVS namespace length limit.
pub const NVS_MAX_NAMESPACE_LEN: usize = 15;

/// Store on the default NVS partition.
pub struct NvsStore {
    partition: EspDefaultNvsPartition,
    nvs: Option<EspNvs<NvsDefault>>,
}

impl NvsStore {
    /// Take the default NVS partition.
    ///
    /// Fails if the partition was already taken elsewhere (for example by the
    /// WiFi driver); use [`NvsStore::new`] with a cloned handle in that case.
    pub fn take() -> Result<Self, StoreError> {
        Ok(Self::new(EspDefaultNvsPartition::take()?))
    }

    /// Use an existing partition handle.
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition,
            nvs: None,
        }
    }

    /// Partition handle, for sharing with the WiFi driver.
    pub fn partition(&self) -> EspDefaultNvsPartition {
        self.partition.clone()
    }

    fn open(&self) -> Result<&EspNvs<NvsDefault>, StoreError> {
        self.nvs.as_ref().ok_or(StoreError::NotInitialized)
    }

    fn writable(&mut self, key: &str) -> Result<&mut EspNvs<NvsDefault>, StoreError> {
        validate_key(key, NVS_MAX_KEY_LEN)?;
        self.nvs.as_mut().ok_or(StoreError::NotInitialized)
    }
}

impl Store for NvsStore {
    fn begin(&mut self, namespace: &str) -> Result<(), StoreError> {
        if namespace.is_empty() || namespace.len() > NVS_MAX_NAMESPACE_LEN {
            return Err(StoreError::InvalidNamespace(namespace.to_string()));
        }
        self.nvs = Some(EspNvs::new(self.partition.clone(), namespace, true)?);
        debug!("NVS namespace {:?} opened", namespace);
        Ok(())
    }

    fn end(&mut self) {
        self.nvs = None;
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let nvs = self.open()?;
        // SAFETY: the handle is owned by `nvs` and stays open for both calls.
        unsafe {
            esp_idf_sys::esp!(esp_idf_sys::nvs_erase_all(nvs.handle()))?;
            esp_idf_sys::esp!(esp_idf_sys::nvs_commit(nvs.handle()))?;
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        match self.open() {
            Ok(nvs) => nvs.contains(key).unwrap_or(false),
            Err(_) => false,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        let nvs = self.open().ok()?;
        let len = nvs.str_len(key).ok()??;
        let mut buf = vec![0u8; len];
        match nvs.get_str(key, &mut buf) {
            Ok(value) => value.map(str::to_string),
            Err(e) => {
                warn!("NVS read of {:?} failed: {:?}", key, e);
                None
            }
        }
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.writable(key)?.set_str(key, value)?;
        Ok(())
    }

    fn get_int(&self, key: &str) -> Option<i32> {
        self.open().ok()?.get_i32(key).ok()?
    }

    fn put_int(&mut self, key: &str, value: i32) -> Result<(), StoreError> {
        self.writable(key)?.set_i32(key, value)?;
        Ok(())
    }

    fn get_uint(&self, key: &str) -> Option<u32> {
        self.open().ok()?.get_u32(key).ok()?
    }

    fn put_uint(&mut self, key: &str, value: u32) -> Result<(), StoreError> {
        self.writable(key)?.set_u32(key, value)?;
        Ok(())
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.open().ok()?.get_u8(key).ok()?.map(|v| v != 0)
    }

    fn put_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError> {
        self.writable(key)?.set_u8(key, value as u8)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        Ok(self.writable(key)?.remove(key)?)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.open()?;
        Ok(())
    }
}
