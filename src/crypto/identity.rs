//! Hardware identity used for key derivation.

use std::fmt;

/// Identity of the device the cipher key is bound to.
///
/// Only public, reproducible hardware values are used so the same device
/// always derives the same key without storing it anywhere.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Station MAC address.
    pub mac: [u8; 6],
    /// Chip-unique identifier (low 32 bits of the factory eFuse MAC on ESP32).
    pub chip_id: u32,
}

impl DeviceIdentity {
    /// Build an identity from explicit values.
    pub const fn new(mac: [u8; 6], chip_id: u32) -> Self {
        Self { mac, chip_id }
    }

    /// Read the identity from the ESP32 eFuse and WiFi station MAC.
    #[cfg(feature = "esp32")]
    pub fn read() -> Result<Self, esp_idf_sys::EspError> {
        use esp_idf_sys::{
            esp, esp_efuse_mac_get_default, esp_mac_type_t_ESP_MAC_WIFI_STA, esp_read_mac,
        };

        let mut mac = [0u8; 6];
        let mut base = [0u8; 6];
        // SAFETY: both buffers are 6 bytes, the size these calls write.
        unsafe {
            esp!(esp_read_mac(mac.as_mut_ptr(), esp_mac_type_t_ESP_MAC_WIFI_STA))?;
            esp!(esp_efuse_mac_get_default(base.as_mut_ptr()))?;
        }
        let chip_id = u32::from_le_bytes([base[0], base[1], base[2], base[3]]);
        Ok(Self { mac, chip_id })
    }

    /// Derive a stable identity on a development host.
    ///
    /// Uses `/etc/machine-id` when present so the simulator keeps decrypting
    /// its own stored secrets across runs. Falls back to an all-zero identity.
    #[cfg(not(feature = "esp32"))]
    pub fn host() -> Self {
        let machine_id = std::fs::read_to_string("/etc/machine-id").unwrap_or_default();
        let bytes: Vec<u8> = machine_id
            .trim()
            .as_bytes()
            .chunks(2)
            .filter_map(|pair| std::str::from_utf8(pair).ok())
            .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
            .collect();

        if bytes.len() < 10 {
            log::debug!("No usable machine id, using zero device identity");
            return Self::new([0; 6], 0);
        }

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[..6]);
        let chip_id = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        Self { mac, chip_id }
    }

    /// Last two MAC bytes as upper-case hex, used for device naming.
    pub fn short_suffix(&self) -> String {
        format!("{:02X}{:02X}", self.mac[4], self.mac[5])
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceIdentity({:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}, chip {:08x})",
            self.mac[0],
            self.mac[1],
            self.mac[2],
            self.mac[3],
            self.mac[4],
            self.mac[5],
            self.chip_id
        )
    }
}
