//! IonConnect provisioning core for ESP32.
//!
//! Keeps a device on its WiFi network across reboots and radio loss, and
//! stores the credentials and settings a provisioning portal collects.
//! Everything except the ESP-IDF adapters (`esp32` feature) builds and is
//! tested on the host.
//!
//! - [`crypto`] - device-bound obfuscation of secret values
//! - [`storage`] - key/value store with NVS, host-file and flat-region backends
//! - [`config`] - schema-validated configuration engine with backup/restore
//! - [`wifi`] - connection state machine, backoff and radio abstraction
//! - [`provisioner`] - boot flow tying the above together

pub mod config;
pub mod crypto;
pub mod error;
pub mod provisioner;
pub mod storage;
pub mod wifi;

// Re-export commonly used items
pub use config::{ConfigEngine, ConfigError, EngineOptions, SchemaPolicy};
pub use crypto::{DeviceCipher, DeviceIdentity};
pub use error::{Error, ErrorKind};
pub use provisioner::{BeginOutcome, Provisioner, ProvisionerConfig};
pub use storage::{Store, StoreError};
pub use wifi::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, Radio};
