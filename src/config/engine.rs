//! The configuration engine.

use super::{ConfigError, ConfigField, Schema};
use crate::crypto::DeviceCipher;
use crate::storage::{Store, DEFAULT_NAMESPACE};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Store key holding the whole configuration map.
pub const KEY_CONFIG_DATA: &str = "config_data";

/// Prefix marking a value stored through the cipher.
const ENC_PREFIX: &str = "enc:";

/// Backup envelope version written by [`ConfigEngine::export_json`].
const BACKUP_VERSION: &str = "1.0";

/// Key names treated as secrets when no schema field describes them.
const SECRET_KEYS: &[&str] = &["wifi_pass", "password", "access_token"];
const SECRET_SUFFIXES: &[&str] = &["_pass", "_password", "_token"];

/// Seconds since the Unix epoch, or 0 if the clock is not set.
pub(crate) fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// How the engine behaves while no schema is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaPolicy {
    /// Accept any key and value; `validate` succeeds.
    #[default]
    Permissive,
    /// Refuse `set` and `validate` with [`ConfigError::NoSchema`].
    Strict,
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Store namespace opened by [`ConfigEngine::begin`].
    pub namespace: String,
    pub policy: SchemaPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            policy: SchemaPolicy::Permissive,
        }
    }
}

impl EngineOptions {
    /// Namespaces must fit every backend (NVS allows 15 characters).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::InvalidOptions("namespace must not be empty"));
        }
        if self.namespace.len() > 15 {
            return Err(ConfigError::InvalidOptions(
                "namespace must be at most 15 bytes",
            ));
        }
        Ok(())
    }
}

/// Validated, persisted configuration map.
///
/// Owns its [`Store`]. Changes made with [`set`](Self::set) stay in memory
/// until [`save`](Self::save).
#[derive(Debug)]
pub struct ConfigEngine<S: Store> {
    store: S,
    cipher: DeviceCipher,
    options: EngineOptions,
    schema: Option<Schema>,
    values: BTreeMap<String, String>,
}

impl<S: Store> ConfigEngine<S> {
    pub fn new(
        store: S,
        cipher: DeviceCipher,
        options: EngineOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            store,
            cipher,
            options,
            schema: None,
            values: BTreeMap::new(),
        })
    }

    /// Open the store namespace and load the saved map.
    pub fn begin(&mut self) -> Result<(), ConfigError> {
        self.store.begin(&self.options.namespace)?;
        self.load();
        Ok(())
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn cipher(&self) -> &DeviceCipher {
        &self.cipher
    }

    // ---- schema ----

    /// Replace the schema. On error no schema remains loaded.
    pub fn load_schema(&mut self, json: &str) -> Result<(), ConfigError> {
        self.schema = None;
        match Schema::parse(json) {
            Ok(schema) => {
                info!("Schema loaded: {} fields", schema.len());
                self.schema = Some(schema);
                Ok(())
            }
            Err(e) => {
                warn!("Schema rejected: {}", e);
                Err(e)
            }
        }
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    /// Schema fields, empty without a schema.
    pub fn fields(&self) -> &[ConfigField] {
        self.schema.as_ref().map(Schema::fields).unwrap_or(&[])
    }

    pub fn field(&self, id: &str) -> Option<&ConfigField> {
        self.schema.as_ref()?.field(id)
    }

    // ---- values ----

    /// Current value of `key`: the stored value (decrypted if needed), else
    /// the non-empty schema default.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(stored) = self.values.get(key) {
            return match stored.strip_prefix(ENC_PREFIX) {
                Some(hex) => match self.cipher.decrypt(hex) {
                    Ok(plain) => Some(plain),
                    Err(e) => {
                        warn!("Stored value for {} cannot be decrypted: {}", key, e);
                        None
                    }
                },
                None => Some(stored.clone()),
            };
        }

        self.field(key)
            .map(|f| f.default_value.clone())
            .filter(|d| !d.is_empty())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Validate and set a value. Rejected writes leave the map untouched.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match &self.schema {
            Some(schema) => {
                if let Some(field) = schema.field(key) {
                    if let Err(e) = field.check(value) {
                        warn!("Validation failed for {}: {}", key, e);
                        return Err(e);
                    }
                }
            }
            None if self.options.policy == SchemaPolicy::Strict => {
                return Err(ConfigError::NoSchema);
            }
            None => {}
        }

        // Plain values that look tagged go through the cipher too, so `get`
        // returns them unchanged.
        let stored = if self.should_encrypt(key) || value.starts_with(ENC_PREFIX) {
            format!("{}{}", ENC_PREFIX, self.cipher.encrypt(value))
        } else {
            value.to_string()
        };
        self.values.insert(key.to_string(), stored);
        debug!("Config {} updated", key);
        Ok(())
    }

    /// Remove a value from the map. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Keys with a stored value.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Whether `key` holds a stored value (schema defaults don't count).
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Check that every required field holds a non-empty value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let schema = match &self.schema {
            Some(schema) => schema,
            None if self.options.policy == SchemaPolicy::Strict => {
                return Err(ConfigError::NoSchema);
            }
            None => {
                debug!("No schema loaded, skipping validation");
                return Ok(());
            }
        };

        for field in schema.fields().iter().filter(|f| f.required) {
            let present = self.values.get(&field.id).is_some_and(|v| !v.is_empty());
            if !present {
                warn!("Required field missing: {}", field.id);
                return Err(ConfigError::MissingRequired(field.id.clone()));
            }
        }
        Ok(())
    }

    /// Whether `key` is stored through the cipher.
    ///
    /// The schema's `encrypted` flag decides for known fields; other keys are
    /// matched against common secret names.
    pub fn should_encrypt(&self, key: &str) -> bool {
        match self.field(key) {
            Some(field) => field.encrypted,
            None => {
                SECRET_KEYS.contains(&key) || SECRET_SUFFIXES.iter().any(|s| key.ends_with(s))
            }
        }
    }

    // ---- persistence ----

    /// Write the whole map to the store and commit.
    pub fn save(&mut self) -> Result<(), ConfigError> {
        let json = serde_json::to_string(&self.values).map_err(|e| {
            ConfigError::Storage(crate::storage::StoreError::Serialize(e.to_string()))
        })?;
        self.store.put_string(KEY_CONFIG_DATA, &json)?;
        if let Err(e) = self.store.commit() {
            warn!("Config commit failed: {}", e);
            return Err(e.into());
        }
        info!("Config saved ({} keys)", self.values.len());
        Ok(())
    }

    /// Replace the map with the stored one. Missing or malformed data loads
    /// as an empty map.
    pub fn load(&mut self) {
        self.values = match self.store.get_string(KEY_CONFIG_DATA) {
            None => BTreeMap::new(),
            Some(json) => match serde_json::from_str(&json) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Stored config is malformed, starting empty: {}", e);
                    BTreeMap::new()
                }
            },
        };
        info!("Config loaded ({} keys)", self.values.len());
    }

    /// Forget every value, in memory and in the store.
    pub fn clear(&mut self) -> Result<(), ConfigError> {
        self.values.clear();
        self.store.remove(KEY_CONFIG_DATA)?;
        self.store.commit()?;
        info!("Config cleared");
        Ok(())
    }

    // ---- backup ----

    /// Backup envelope holding the stored form of every value.
    pub fn export_json(&self) -> String {
        json!({
            "version": BACKUP_VERSION,
            "timestamp": unix_time(),
            "config": self.values,
        })
        .to_string()
    }

    /// Replace the map with a backup's contents and save.
    pub fn import_json(&mut self, json: &str) -> Result<(), ConfigError> {
        let doc: Value =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidBackup(e.to_string()))?;
        let config = doc
            .get("config")
            .and_then(Value::as_object)
            .ok_or_else(|| ConfigError::InvalidBackup("missing \"config\" object".into()))?;

        let mut values = BTreeMap::new();
        for (key, value) in config {
            let text = value.as_str().ok_or_else(|| {
                ConfigError::InvalidBackup(format!("value of {:?} is not a string", key))
            })?;
            values.insert(key.clone(), text.to_string());
        }

        info!("Importing {} config values", values.len());
        self.values = values;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SCHEMA;
    use crate::crypto::DeviceIdentity;
    use crate::storage::{FlatStore, MemoryRegion, StoreError};

    fn engine() -> ConfigEngine<FlatStore<MemoryRegion>> {
        let identity = DeviceIdentity::new([0x24, 0x6F, 0x28, 0xAA, 0xBB, 0xCC], 0x1234_5678);
        let cipher = DeviceCipher::new(&identity);
        let store = FlatStore::new(MemoryRegion::new(1024));
        let mut engine = ConfigEngine::new(store, cipher, EngineOptions::default()).unwrap();
        engine.begin().unwrap();
        engine
    }

    #[test]
    fn test_options_validate() {
        assert!(EngineOptions::default().validate().is_ok());
        let long = EngineOptions {
            namespace: "a_very_long_namespace".into(),
            ..Default::default()
        };
        assert!(matches!(long.validate(), Err(ConfigError::InvalidOptions(_))));
    }

    #[test]
    fn test_secret_stored_encrypted() {
        let mut engine = engine();
        engine.load_schema(DEFAULT_SCHEMA).unwrap();
        engine.set("wifi_pass", "hunter2222").unwrap();
        let stored = engine.values.get("wifi_pass").unwrap();
        assert!(stored.starts_with("enc:"));
        assert!(!stored.contains("hunter"));
        assert_eq!(engine.get("wifi_pass").as_deref(), Some("hunter2222"));
    }

    #[test]
    fn test_tagged_looking_plain_values_round_trip() {
        let mut engine = engine();
        engine.load_schema(DEFAULT_SCHEMA).unwrap();
        engine.set("wifi_ssid", "enc:cafe").unwrap();
        engine.set("device_name", "enc:zz").unwrap();
        assert_eq!(engine.get("wifi_ssid").as_deref(), Some("enc:cafe"));
        assert_eq!(engine.get("device_name").as_deref(), Some("enc:zz"));

        engine.save().unwrap();
        engine.load();
        assert_eq!(engine.get("wifi_ssid").as_deref(), Some("enc:cafe"));
        assert_eq!(engine.get("device_name").as_deref(), Some("enc:zz"));
    }

    #[test]
    fn test_heuristics_without_schema() {
        let engine = engine();
        assert!(engine.should_encrypt("wifi_pass"));
        assert!(engine.should_encrypt("mqtt_password"));
        assert!(engine.should_encrypt("api_token"));
        assert!(!engine.should_encrypt("device_name"));
    }

    #[test]
    fn test_schema_flag_overrides_heuristics() {
        let mut engine = engine();
        engine
            .load_schema(r#"{"fields":[{"id":"admin_password","encrypted":false}]}"#)
            .unwrap();
        assert!(!engine.should_encrypt("admin_password"));
    }

    #[test]
    fn test_rejected_set_leaves_map() {
        let mut engine = engine();
        engine.load_schema(DEFAULT_SCHEMA).unwrap();
        engine.set("wifi_ssid", "Home").unwrap();
        assert!(matches!(engine.set("wifi_ssid", ""), Err(ConfigError::Required(_))));
        assert!(matches!(engine.set("wifi_pass", "short"), Err(ConfigError::TooShort { .. })));
        assert_eq!(engine.get("wifi_ssid").as_deref(), Some("Home"));
        assert!(!engine.contains("wifi_pass"));
    }

    #[test]
    fn test_default_from_schema() {
        let mut engine = engine();
        assert_eq!(engine.get("device_name"), None);
        engine.load_schema(DEFAULT_SCHEMA).unwrap();
        assert_eq!(engine.get("device_name").as_deref(), Some("IonConnect Device"));
        assert_eq!(engine.get_or("missing", "x"), "x");
    }

    #[test]
    fn test_failed_schema_load_clears_fields() {
        let mut engine = engine();
        engine.load_schema(DEFAULT_SCHEMA).unwrap();
        assert!(engine.load_schema("{not json").is_err());
        assert!(engine.fields().is_empty());
        assert!(!engine.has_schema());
    }

    #[test]
    fn test_validate_required() {
        let mut engine = engine();
        engine.load_schema(DEFAULT_SCHEMA).unwrap();
        assert!(matches!(
            engine.validate(),
            Err(ConfigError::MissingRequired(f)) if f == "wifi_ssid"
        ));
        engine.set("wifi_ssid", "Home").unwrap();
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_permissive_without_schema() {
        let mut engine = engine();
        engine.set("anything", "").unwrap();
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_strict_without_schema() {
        let cipher = DeviceCipher::new(&DeviceIdentity::new([1; 6], 1));
        let options = EngineOptions {
            policy: SchemaPolicy::Strict,
            ..Default::default()
        };
        let mut engine =
            ConfigEngine::new(FlatStore::new(MemoryRegion::new(512)), cipher, options).unwrap();
        engine.begin().unwrap();
        assert!(matches!(engine.set("a", "b"), Err(ConfigError::NoSchema)));
        assert!(matches!(engine.validate(), Err(ConfigError::NoSchema)));
        engine.load_schema(DEFAULT_SCHEMA).unwrap();
        engine.set("wifi_ssid", "Home").unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let mut engine = engine();
        engine.set("wifi_ssid", "Home").unwrap();
        engine.set("wifi_pass", "secret123").unwrap();
        engine.save().unwrap();

        engine.remove("wifi_ssid");
        engine.load();
        assert_eq!(engine.get("wifi_ssid").as_deref(), Some("Home"));
        assert_eq!(engine.get("wifi_pass").as_deref(), Some("secret123"));

        let blob = engine.store().get_string(KEY_CONFIG_DATA).unwrap();
        assert!(blob.contains("enc:"));
        assert!(!blob.contains("secret123"));
    }

    #[test]
    fn test_malformed_blob_loads_empty() {
        let mut engine = engine();
        engine.store_mut().put_string(KEY_CONFIG_DATA, "[1,2").unwrap();
        engine.load();
        assert_eq!(engine.keys().count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut engine = engine();
        engine.set("a", "1").unwrap();
        engine.save().unwrap();
        engine.clear().unwrap();
        assert!(!engine.store().exists(KEY_CONFIG_DATA));
        engine.load();
        assert_eq!(engine.get("a"), None);
    }

    #[test]
    fn test_save_failure_reported() {
        let mut engine = engine();
        engine.set("blob", &"x".repeat(2000)).unwrap();
        assert!(matches!(
            engine.save(),
            Err(ConfigError::Storage(StoreError::CapacityExceeded { .. }))
        ));
    }

    #[test]
    fn test_export_import() {
        let mut engine = engine();
        engine.set("wifi_ssid", "Home").unwrap();
        engine.set("wifi_pass", "secret123").unwrap();
        let backup = engine.export_json();

        let doc: Value = serde_json::from_str(&backup).unwrap();
        assert_eq!(doc["version"], "1.0");
        assert!(doc["timestamp"].is_u64());
        assert!(doc["config"]["wifi_pass"].as_str().unwrap().starts_with("enc:"));

        engine.clear().unwrap();
        engine.import_json(&backup).unwrap();
        assert_eq!(engine.get("wifi_ssid").as_deref(), Some("Home"));
        assert_eq!(engine.get("wifi_pass").as_deref(), Some("secret123"));
        assert!(engine.store().exists(KEY_CONFIG_DATA));
    }

    #[test]
    fn test_import_rejects_bad_envelope() {
        let mut engine = engine();
        engine.set("keep", "me").unwrap();
        assert!(matches!(
            engine.import_json(r#"{"version":"1.0"}"#),
            Err(ConfigError::InvalidBackup(_))
        ));
        assert!(matches!(
            engine.import_json(r#"{"config":{"n":5}}"#),
            Err(ConfigError::InvalidBackup(_))
        ));
        assert_eq!(engine.get("keep").as_deref(), Some("me"));
    }
}
