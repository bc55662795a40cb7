//! Structured key/value store for host (development) builds.
//!
//! Plays the role NVS plays on the device: every write is durable as soon as
//! the call returns, so [`commit`](Store::commit) has nothing to do. Each
//! namespace lives in its own JSON file, `~/.ionconnect-esp32/<namespace>.json`
//! by default.

use super::{validate_key, Store, StoreError, StoreValue, MAX_KEY_LEN};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory holding host-side device state.
///
/// Returns `~/.ionconnect-esp32`
pub(crate) fn data_dir() -> Result<PathBuf, StoreError> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".ionconnect-esp32"))
}

/// File-backed structured store.
#[derive(Debug)]
pub struct HostKvStore {
    dir: PathBuf,
    namespace: Option<String>,
    entries: BTreeMap<String, StoreValue>,
}

impl HostKvStore {
    /// Store namespaces as files under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            namespace: None,
            entries: BTreeMap::new(),
        }
    }

    /// Store namespaces under `~/.ionconnect-esp32`.
    pub fn default_location() -> Result<Self, StoreError> {
        Ok(Self::new(data_dir()?))
    }

    /// Directory the namespace files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }

    fn read_file(path: &Path) -> BTreeMap<String, StoreValue> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No store file at {:?}", path);
                return BTreeMap::new();
            }
            Err(e) => {
                warn!("Failed to read store file {:?}: {}", path, e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&text) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Store file {:?} is corrupted, starting empty: {}", path, e);
                BTreeMap::new()
            }
        }
    }

    /// Rewrite the namespace file from `entries`.
    fn flush(&mut self) -> Result<(), StoreError> {
        let namespace = self.namespace.as_deref().ok_or(StoreError::NotInitialized)?;
        let path = self.file_for(namespace);
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn mutate(
        &mut self,
        change: impl FnOnce(&mut BTreeMap<String, StoreValue>) -> bool,
    ) -> Result<bool, StoreError> {
        if self.namespace.is_none() {
            return Err(StoreError::NotInitialized);
        }
        let previous = self.entries.clone();
        let changed = change(&mut self.entries);
        if !changed {
            return Ok(false);
        }
        if let Err(e) = self.flush() {
            self.entries = previous;
            return Err(e);
        }
        Ok(true)
    }

    fn put(&mut self, key: &str, value: StoreValue) -> Result<(), StoreError> {
        validate_key(key, MAX_KEY_LEN)?;
        let key = key.to_string();
        self.mutate(move |entries| {
            entries.insert(key, value);
            true
        })?;
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&StoreValue> {
        self.namespace.as_ref()?;
        self.entries.get(key)
    }
}

impl Store for HostKvStore {
    fn begin(&mut self, namespace: &str) -> Result<(), StoreError> {
        if self.namespace.as_deref() == Some(namespace) {
            return Ok(());
        }
        if namespace.is_empty() || namespace.contains(['/', '\\', '.']) {
            return Err(StoreError::InvalidNamespace(namespace.to_string()));
        }
        self.entries = Self::read_file(&self.file_for(namespace));
        self.namespace = Some(namespace.to_string());
        debug!("Opened namespace {:?} ({} keys)", namespace, self.entries.len());
        Ok(())
    }

    fn end(&mut self) {
        self.namespace = None;
        self.entries.clear();
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.mutate(|entries| {
            entries.clear();
            true
        })?;
        Ok(())
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
        self.mutate(|entries| entries.remove(key).is_some())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.namespace.is_none() {
            return Err(StoreError::NotInitialized);
        }
        Ok(())
    }
}
