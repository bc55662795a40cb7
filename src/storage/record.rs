//! Tagged-record image format for flat byte regions.
//!
//! ```text
//! [magic:4 LE][version:1][ns_len:1][ns:ns_len]
//! ( [key_len:1][key][type:1][data_len:2 LE][data] )*
//! [0x00]
//! ```
//!
//! Values are written as text: strings verbatim, integers in decimal,
//! booleans as `"1"`/`"0"`. A key length of `0x00` ends the image; `0xFF`
//! (erased flash) is also accepted as an end marker.

use super::{StoreError, StoreValue, ValueKind, MAX_KEY_LEN};
use std::collections::BTreeMap;
use std::fmt;

/// Image magic, `"IONC"` as a big-endian u32.
pub const MAGIC: u32 = 0x494F_4E43;

/// Current image format version.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum data length of a single record.
pub const MAX_DATA_LEN: usize = u16::MAX as usize;

/// Maximum namespace length.
pub const MAX_NAMESPACE_LEN: usize = u8::MAX as usize;

/// Bytes taken by an empty image for `namespace` (header plus terminator).
pub fn header_len(namespace: &str) -> usize {
    4 + 1 + 1 + namespace.len() + 1
}

/// Encoded size of one record.
pub fn record_len(key: &str, value: &StoreValue) -> usize {
    1 + key.len() + 1 + 2 + value_bytes(value).len()
}

/// Encode a full image, including the terminator.
pub fn encode(
    namespace: &str,
    entries: &BTreeMap<String, StoreValue>,
) -> Result<Vec<u8>, StoreError> {
    if namespace.is_empty() || namespace.len() > MAX_NAMESPACE_LEN {
        return Err(StoreError::InvalidNamespace(namespace.to_string()));
    }

    let mut out = Vec::with_capacity(header_len(namespace));
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(FORMAT_VERSION);
    out.push(namespace.len() as u8);
    out.extend_from_slice(namespace.as_bytes());

    for (key, value) in entries {
        super::validate_key(key, MAX_KEY_LEN)?;
        let data = value_bytes(value);
        if data.len() > MAX_DATA_LEN {
            return Err(StoreError::ValueTooLarge {
                key: key.clone(),
                len: data.len(),
                max: MAX_DATA_LEN,
            });
        }

        out.push(key.len() as u8);
        out.extend_from_slice(key.as_bytes());
        out.push(value.kind() as u8);
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(&data);
    }

    out.push(0);
    Ok(out)
}

/// Decode an image written for `namespace`.
pub fn decode(image: &[u8], namespace: &str) -> Result<BTreeMap<String, StoreValue>, DecodeError> {
    let mut reader = Reader { buf: image, pos: 0 };

    let magic = u32::from_le_bytes(reader.array::<4>()?);
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }

    let version = reader.byte()?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let ns_len = reader.byte()? as usize;
    let ns = reader.take(ns_len)?;
    if ns != namespace.as_bytes() {
        return Err(DecodeError::NamespaceMismatch {
            found: String::from_utf8_lossy(ns).into_owned(),
        });
    }

    let mut entries = BTreeMap::new();
    while !reader.is_empty() {
        let key_len = reader.byte()?;
        if key_len == 0 || key_len == 0xFF {
            break;
        }

        let key = std::str::from_utf8(reader.take(key_len as usize)?)
            .map_err(|_| DecodeError::InvalidUtf8)?
            .to_string();
        let tag = reader.byte()?;
        let kind = ValueKind::from_tag(tag).ok_or(DecodeError::UnknownType(tag))?;
        let data_len = u16::from_le_bytes(reader.array::<2>()?) as usize;
        let data = reader.take(data_len)?;

        let value = parse_value(kind, data).ok_or_else(|| DecodeError::BadValue(key.clone()))?;
        entries.insert(key, value);
    }

    Ok(entries)
}

fn value_bytes(value: &StoreValue) -> Vec<u8> {
    match value {
        StoreValue::String(s) => s.as_bytes().to_vec(),
        StoreValue::Int(v) => v.to_string().into_bytes(),
        StoreValue::UInt(v) => v.to_string().into_bytes(),
        StoreValue::Bool(v) => if *v { b"1".to_vec() } else { b"0".to_vec() },
    }
}

fn parse_value(kind: ValueKind, data: &[u8]) -> Option<StoreValue> {
    let text = std::str::from_utf8(data).ok()?;
    match kind {
        ValueKind::String => Some(StoreValue::String(text.to_string())),
        ValueKind::Int => text.parse().ok().map(StoreValue::Int),
        ValueKind::UInt => text.parse().ok().map(StoreValue::UInt),
        ValueKind::Bool => match text {
            "1" => Some(StoreValue::Bool(true)),
            "0" => Some(StoreValue::Bool(false)),
            _ => None,
        },
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// Reasons an image could not be decoded.
///
/// None of these are fatal to the store: the region is re-initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Region does not start with [`MAGIC`] (blank or foreign data).
    BadMagic(u32),
    /// Image was written by an unknown format version.
    UnsupportedVersion(u8),
    /// Image belongs to another namespace.
    NamespaceMismatch { found: String },
    /// A length field points past the end of the region.
    Truncated,
    /// Key bytes are not UTF-8.
    InvalidUtf8,
    /// Unknown type tag.
    UnknownType(u8),
    /// Value text does not parse as its declared type.
    BadValue(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(m) => write!(f, "bad magic {:#010x}", m),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version {}", v),
            Self::NamespaceMismatch { found } => {
                write!(f, "namespace mismatch (found {:?})", found)
            }
            Self::Truncated => write!(f, "truncated record"),
            Self::InvalidUtf8 => write!(f, "key is not valid UTF-8"),
            Self::UnknownType(t) => write!(f, "unknown type tag {}", t),
            Self::BadValue(key) => write!(f, "malformed value for {:?}", key),
        }
    }
}

impl std::error::Error for DecodeError {}
