//! Fixed-size byte regions backing [`FlatStore`](super::FlatStore).

use super::StoreError;
#[cfg(not(feature = "esp32"))]
use std::fs;
#[cfg(not(feature = "esp32"))]
use std::path::{Path, PathBuf};

/// Value of an erased flash byte.
pub const ERASED: u8 = 0xFF;

/// A flat, byte-addressable persistent region of fixed size.
pub trait FlashRegion {
    /// Region size in bytes.
    fn capacity(&self) -> usize;

    /// Read the whole region (always `capacity()` bytes).
    fn read(&self) -> Result<Vec<u8>, StoreError>;

    /// Write `image` at offset 0.
    ///
    /// Callers guarantee `image.len() <= capacity()`. Bytes past the image
    /// are left as they were.
    fn write(&mut self, image: &[u8]) -> Result<(), StoreError>;
}

/// Region held in RAM. Used for tests and for emulated EEPROM.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    bytes: Vec<u8>,
    fail_writes: bool,
    writes: usize,
}

impl MemoryRegion {
    /// Create an erased region of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![ERASED; capacity],
            fail_writes: false,
            writes: 0,
        }
    }

    /// Create a region with the given contents.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            fail_writes: false,
            writes: 0,
        }
    }

    /// Current region contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Make every subsequent write fail, simulating worn-out flash.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl FlashRegion for MemoryRegion {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self) -> Result<Vec<u8>, StoreError> {
        Ok(self.bytes.clone())
    }

    fn write(&mut self, image: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated flash write failure",
            )));
        }
        if image.len() > self.bytes.len() {
            return Err(StoreError::CapacityExceeded {
                needed: image.len(),
                capacity: self.bytes.len(),
            });
        }
        self.bytes[..image.len()].copy_from_slice(image);
        self.writes += 1;
        Ok(())
    }
}

/// Region stored in a fixed-size file on a development host.
///
/// Writes go to a sibling temp file that is renamed over the original, so a
/// crash mid-write leaves the previous image intact.
#[cfg(not(feature = "esp32"))]
#[derive(Debug, Clone)]
pub struct FileRegion {
    path: PathBuf,
    capacity: usize,
}

#[cfg(not(feature = "esp32"))]
impl FileRegion {
    /// Use `path` as a region of `capacity` bytes.
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    /// `~/.ionconnect-esp32/eeprom.bin`
    pub fn default_location(capacity: usize) -> Result<Self, StoreError> {
        Ok(Self::new(super::host_kv::data_dir()?.join("eeprom.bin"), capacity))
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(not(feature = "esp32"))]
impl FlashRegion for FileRegion {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> Result<Vec<u8>, StoreError> {
        let mut bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No region file at {:?}, treating as erased", self.path);
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        bytes.resize(self.capacity, ERASED);
        Ok(bytes)
    }

    fn write(&mut self, image: &[u8]) -> Result<(), StoreError> {
        if image.len() > self.capacity {
            return Err(StoreError::CapacityExceeded {
                needed: image.len(),
                capacity: self.capacity,
            });
        }

        let mut bytes = self.read()?;
        bytes[..image.len()].copy_from_slice(image);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
