//! Device-bound obfuscation of sensitive configuration values.
//!
//! This module contains:
//! - [`identity`]: hardware identity (MAC + chip id) the key is derived from
//! - [`cipher`]: the XOR stream cipher, hex codec and token generator
//!
//! # Security
//!
//! This is reproducible obfuscation, not cryptography. It keeps secrets out of
//! a casual config export or flash dump. Anyone with physical access to the
//! device can re-derive the key from its MAC address.

mod cipher;
mod identity;

pub use cipher::{CipherError, DeviceCipher, KEY_LEN, TOKEN_CHARSET};
pub use identity::DeviceIdentity;
