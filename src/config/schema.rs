//! Configuration schema: the list of fields a device exposes to the portal.
//!
//! A schema is JSON of the form
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "fields": [
//!     { "id": "wifi_ssid", "label": "WiFi Network", "type": "text",
//!       "required": true, "maxLength": 32 }
//!   ]
//! }
//! ```
//!
//! Parsing is bounded: documents over [`MAX_SCHEMA_BYTES`] or with more than
//! [`MAX_CONFIG_FIELDS`] fields are refused before any field is registered.

use super::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// Largest schema document accepted.
pub const MAX_SCHEMA_BYTES: usize = 4096;

/// Largest number of fields in one schema.
pub const MAX_CONFIG_FIELDS: usize = 32;

/// Input widget type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldKind {
    #[default]
    Text,
    Password,
    Number,
    Email,
    Select,
    Checkbox,
    /// Any type the portal knows and the engine treats as text.
    Other(String),
}

impl FieldKind {
    fn parse(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "password" => Self::Password,
            "number" => Self::Number,
            "email" => Self::Email,
            "select" => Self::Select,
            "checkbox" => Self::Checkbox,
            other => Self::Other(other.to_string()),
        }
    }

    /// Type name as written in the schema.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Password => "password",
            Self::Number => "number",
            Self::Email => "email",
            Self::Select => "select",
            Self::Checkbox => "checkbox",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schema entry.
#[derive(Debug, Clone)]
pub struct ConfigField {
    pub id: String,
    pub label: String,
    pub kind: FieldKind,
    pub default_value: String,
    pub placeholder: String,
    pub required: bool,
    pub encrypted: bool,
    /// Minimum length in characters.
    pub min_len: Option<usize>,
    /// Maximum length in characters.
    pub max_len: Option<usize>,
    /// Lower bound for `number` fields.
    pub min: Option<f64>,
    /// Upper bound for `number` fields.
    pub max: Option<f64>,
    pattern: Option<String>,
    /// Portal-side visibility condition, passed through untouched.
    pub visible_if: Option<String>,
    pub options: Vec<String>,
    compiled: Option<Regex>,
}

impl ConfigField {
    /// A plain optional text field.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            kind: FieldKind::Text,
            default_value: String::new(),
            placeholder: String::new(),
            required: false,
            encrypted: false,
            min_len: None,
            max_len: None,
            min: None,
            max: None,
            pattern: None,
            visible_if: None,
            options: Vec::new(),
            compiled: None,
        }
    }

    /// Require values to fully match `pattern`.
    ///
    /// An empty pattern clears the constraint.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            self.pattern = None;
            self.compiled = None;
            return Ok(self);
        }
        let re = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            ConfigError::SchemaInvalid(format!("field {:?}: bad pattern: {}", self.id, e))
        })?;
        self.pattern = Some(pattern.to_string());
        self.compiled = Some(re);
        Ok(self)
    }

    /// Source text of the pattern, if any.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Check `value` against this field's constraints.
    ///
    /// Empty optional values are always accepted.
    pub fn check(&self, value: &str) -> Result<(), ConfigError> {
        if value.is_empty() {
            if self.required {
                return Err(ConfigError::Required(self.id.clone()));
            }
            return Ok(());
        }

        if self.kind == FieldKind::Number {
            let n: f64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::NotANumber(self.id.clone()))?;
            let below = self.min.is_some_and(|min| n < min);
            let above = self.max.is_some_and(|max| n > max);
            if below || above {
                return Err(ConfigError::OutOfRange {
                    field: self.id.clone(),
                    min: self.min,
                    max: self.max,
                });
            }
        }

        let chars = value.chars().count();
        if let Some(min) = self.min_len {
            if chars < min {
                return Err(ConfigError::TooShort {
                    field: self.id.clone(),
                    min,
                });
            }
        }
        if let Some(max) = self.max_len {
            if chars > max {
                return Err(ConfigError::TooLong {
                    field: self.id.clone(),
                    max,
                });
            }
        }

        if let Some(re) = &self.compiled {
            if !re.is_match(value) {
                return Err(ConfigError::PatternMismatch(self.id.clone()));
            }
        }

        if !self.options.is_empty() && !self.options.iter().any(|o| o == value) {
            return Err(ConfigError::NotAnOption(self.id.clone()));
        }

        Ok(())
    }
}

/// A parsed, validated schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub version: Option<String>,
    pub namespace: Option<String>,
    fields: Vec<ConfigField>,
}

impl Schema {
    /// Parse a schema document.
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        if json.len() > MAX_SCHEMA_BYTES {
            return Err(ConfigError::SchemaInvalid(format!(
                "document is {} bytes (max {})",
                json.len(),
                MAX_SCHEMA_BYTES
            )));
        }

        let raw: RawSchema =
            serde_json::from_str(json).map_err(|e| ConfigError::SchemaInvalid(e.to_string()))?;
        let raw_fields = raw
            .fields
            .ok_or_else(|| ConfigError::SchemaInvalid("missing \"fields\" array".into()))?;
        if raw_fields.len() > MAX_CONFIG_FIELDS {
            return Err(ConfigError::SchemaInvalid(format!(
                "{} fields (max {})",
                raw_fields.len(),
                MAX_CONFIG_FIELDS
            )));
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(raw_fields.len());
        for raw_field in raw_fields {
            let field = raw_field.into_field()?;
            if !seen.insert(field.id.clone()) {
                return Err(ConfigError::SchemaInvalid(format!(
                    "duplicate field id {:?}",
                    field.id
                )));
            }
            fields.push(field);
        }

        Ok(Self {
            version: raw.version,
            namespace: raw.namespace,
            fields,
        })
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[ConfigField] {
        &self.fields
    }

    /// Look up a field by id.
    pub fn field(&self, id: &str) -> Option<&ConfigField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Deserialize)]
struct RawSchema {
    version: Option<String>,
    namespace: Option<String>,
    fields: Option<Vec<RawField>>,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawField {
    id: String,
    label: String,
    #[serde(rename = "type")]
    kind: String,
    default: serde_json::Value,
    placeholder: String,
    required: bool,
    encrypted: bool,
    #[serde(rename = "minLength")]
    min_length: Option<usize>,
    #[serde(rename = "maxLength")]
    max_length: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    pattern: Option<String>,
    visible_if: Option<String>,
    options: Vec<serde_json::Value>,
}

impl Default for RawField {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            kind: "text".into(),
            default: serde_json::Value::Null,
            placeholder: String::new(),
            required: false,
            encrypted: false,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: None,
            visible_if: None,
            options: Vec::new(),
        }
    }
}

/// Render a scalar JSON value the way it is stored in the config map.
fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl RawField {
    fn into_field(self) -> Result<ConfigField, ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::SchemaInvalid("field without id".into()));
        }

        // Zero means "no limit", as schema authors commonly write it.
        let nonzero = |v: Option<usize>| v.filter(|n| *n > 0);

        let field = ConfigField {
            label: self.label,
            kind: FieldKind::parse(&self.kind),
            default_value: scalar_text(&self.default),
            placeholder: self.placeholder,
            required: self.required,
            encrypted: self.encrypted,
            min_len: nonzero(self.min_length),
            max_len: nonzero(self.max_length),
            min: self.min,
            max: self.max,
            pattern: None,
            visible_if: self.visible_if.filter(|v| !v.is_empty()),
            options: self.options.iter().map(scalar_text).collect(),
            compiled: None,
            id: self.id,
        };
        field.with_pattern(self.pattern.as_deref().unwrap_or(""))
    }
}
