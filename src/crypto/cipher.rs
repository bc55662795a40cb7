//! XOR stream cipher keyed from the device identity.
//!
//! # Example
//!
//! ```
//! use ionconnect_esp32::crypto::{DeviceCipher, DeviceIdentity};
//!
//! let cipher = DeviceCipher::new(&DeviceIdentity::new([1, 2, 3, 4, 5, 6], 42));
//! let hex = cipher.encrypt("hunter22");
//! assert_eq!(cipher.decrypt(&hex).unwrap(), "hunter22");
//! ```

use super::DeviceIdentity;
use rand_core::{OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Derived key length in bytes.
pub const KEY_LEN: usize = 16;

/// Characters used by [`DeviceCipher::generate_token`].
pub const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Key material, wiped when the cipher is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct Key([u8; KEY_LEN]);

/// Device-bound symmetric obfuscation.
///
/// The key is derived once from the [`DeviceIdentity`] and lives only in RAM.
#[derive(Clone)]
pub struct DeviceCipher {
    key: Key,
}

impl DeviceCipher {
    /// Derive the cipher key for a device.
    ///
    /// `key[i] = mac[i % 6] ^ chip_id_byte(i % 4) ^ (i * 31)`
    pub fn new(identity: &DeviceIdentity) -> Self {
        let mut key = [0u8; KEY_LEN];
        for (i, byte) in key.iter_mut().enumerate() {
            let chip_byte = (identity.chip_id >> ((i % 4) * 8)) as u8;
            *byte = identity.mac[i % 6] ^ chip_byte ^ (i as u8).wrapping_mul(31);
        }
        Self { key: Key(key) }
    }

    /// Obfuscate `plaintext`, returning lower-case hex.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let bytes: Vec<u8> = plaintext
            .bytes()
            .enumerate()
            .map(|(i, b)| b ^ self.key.0[i % KEY_LEN])
            .collect();
        hex::encode(bytes)
    }

    /// Reverse [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let mut bytes = hex::decode(ciphertext).map_err(|e| match e {
            hex::FromHexError::InvalidHexCharacter { c, .. } => CipherError::InvalidHex(c),
            _ => CipherError::OddLength(ciphertext.len()),
        })?;
        for (i, b) in bytes.iter_mut().enumerate() {
            *b ^= self.key.0[i % KEY_LEN];
        }
        String::from_utf8(bytes).map_err(|_| CipherError::InvalidUtf8)
    }

    /// Generate a random alphanumeric token from the OS/hardware RNG.
    pub fn generate_token(length: usize) -> String {
        (0..length)
            .map(|_| {
                let idx = OsRng.next_u32() as usize % TOKEN_CHARSET.len();
                TOKEN_CHARSET[idx] as char
            })
            .collect()
    }
}

impl fmt::Debug for DeviceCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceCipher { key: <redacted> }")
    }
}

/// Errors from decoding obfuscated values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// Hex input has an odd number of characters.
    OddLength(usize),
    /// Hex input contains a non-hex character.
    InvalidHex(char),
    /// Decoded bytes are not UTF-8 (usually a different device's key).
    InvalidUtf8,
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OddLength(len) => write!(f, "hex input has odd length {}", len),
            Self::InvalidHex(c) => write!(f, "invalid hex character {:?}", c),
            Self::InvalidUtf8 => write!(f, "decrypted value is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CipherError {}
