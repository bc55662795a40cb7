//! Schema-driven device configuration.
//!
//! # Components
//!
//! - [`schema`] - field definitions parsed from a bounded JSON document
//! - [`ConfigEngine`] - validated key/value map persisted through a
//!   [`Store`](crate::storage::Store), with secret fields run through the
//!   device cipher
//!
//! Values are strings. Secret values are kept in the map as `enc:<hex>` and
//! decrypted on read, so a backup or flash dump never holds them in clear.

mod engine;
pub mod schema;

pub use engine::{ConfigEngine, EngineOptions, SchemaPolicy, KEY_CONFIG_DATA};
pub(crate) use engine::unix_time;
pub use schema::{ConfigField, FieldKind, Schema, MAX_CONFIG_FIELDS, MAX_SCHEMA_BYTES};

use crate::crypto::CipherError;
use crate::storage::StoreError;
use std::fmt;

/// Schema loaded when the application does not supply one.
pub const DEFAULT_SCHEMA: &str = r#"{
  "version": "1.0",
  "namespace": "ionconnect",
  "fields": [
    {
      "id": "wifi_ssid",
      "label": "WiFi Network",
      "type": "text",
      "required": true,
      "placeholder": "Enter SSID",
      "maxLength": 32
    },
    {
      "id": "wifi_pass",
      "label": "WiFi Password",
      "type": "password",
      "required": false,
      "encrypted": true,
      "minLength": 8,
      "placeholder": "Enter password"
    },
    {
      "id": "device_name",
      "label": "Device Name",
      "type": "text",
      "required": false,
      "default": "IonConnect Device",
      "maxLength": 32
    }
  ]
}"#;

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Required field set to an empty value.
    Required(String),
    /// Value shorter than `minLength`.
    TooShort { field: String, min: usize },
    /// Value longer than `maxLength`.
    TooLong { field: String, max: usize },
    /// Number outside `min`/`max`.
    OutOfRange {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// `number` field that does not parse.
    NotANumber(String),
    /// Value does not match the field pattern.
    PatternMismatch(String),
    /// Value is not one of the field options.
    NotAnOption(String),
    /// Required field missing at validation time.
    MissingRequired(String),
    /// Schema document rejected.
    SchemaInvalid(String),
    /// Operation needs a schema and none is loaded.
    NoSchema,
    /// Backup document rejected.
    InvalidBackup(String),
    /// Engine options rejected.
    InvalidOptions(&'static str),
    /// Persistent store failed.
    Storage(StoreError),
    /// Stored secret could not be decrypted.
    Cipher(CipherError),
}

impl ConfigError {
    /// Field the error refers to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Required(f)
            | Self::TooShort { field: f, .. }
            | Self::TooLong { field: f, .. }
            | Self::OutOfRange { field: f, .. }
            | Self::NotANumber(f)
            | Self::PatternMismatch(f)
            | Self::NotAnOption(f)
            | Self::MissingRequired(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required(field) => write!(f, "{} is required", field),
            Self::TooShort { field, min } => {
                write!(f, "{} must be at least {} characters", field, min)
            }
            Self::TooLong { field, max } => {
                write!(f, "{} must be at most {} characters", field, max)
            }
            Self::OutOfRange { field, min, max } => match (min, max) {
                (Some(lo), Some(hi)) => write!(f, "{} must be between {} and {}", field, lo, hi),
                (Some(lo), None) => write!(f, "{} must be at least {}", field, lo),
                (None, Some(hi)) => write!(f, "{} must be at most {}", field, hi),
                (None, None) => write!(f, "{} out of range", field),
            },
            Self::NotANumber(field) => write!(f, "{} must be a number", field),
            Self::PatternMismatch(field) => write!(f, "{} has an invalid format", field),
            Self::NotAnOption(field) => write!(f, "{} is not one of the allowed options", field),
            Self::MissingRequired(field) => write!(f, "required field {} missing", field),
            Self::SchemaInvalid(msg) => write!(f, "invalid schema: {}", msg),
            Self::NoSchema => write!(f, "no schema loaded"),
            Self::InvalidBackup(msg) => write!(f, "invalid backup: {}", msg),
            Self::InvalidOptions(msg) => write!(f, "invalid engine options: {}", msg),
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::Cipher(e) => write!(f, "cipher error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Cipher(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ConfigError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e)
    }
}

impl From<CipherError> for ConfigError {
    fn from(e: CipherError) -> Self {
        Self::Cipher(e)
    }
}
