//! Saved credentials and scan results.

use super::ConnectError;
use crate::crypto::DeviceCipher;
use log::warn;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Maximum SSID length per IEEE 802.11.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum number of saved networks.
pub const MAX_NETWORKS: usize = 10;

/// Priority given to a network the user connected to explicitly.
pub const CONNECT_PRIORITY: i8 = 10;

/// Prefix of an obfuscated secret in the saved list.
const ENC_PREFIX: &str = "enc:";

/// Check an SSID is 1-32 bytes.
pub fn validate_ssid(ssid: &str) -> Result<(), ConnectError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN {
        return Err(ConnectError::InvalidSsid(ssid.to_string()));
    }
    Ok(())
}

/// A network the device knows how to join.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub ssid: String,
    pub secret: String,
    /// Higher is preferred.
    pub priority: i8,
    /// Unix seconds of the last successful connection, 0 if never.
    pub last_connected: u32,
    /// Last observed signal in dBm.
    pub last_signal: i8,
}

impl Credential {
    pub fn new(
        ssid: impl Into<String>,
        secret: impl Into<String>,
        priority: i8,
    ) -> Result<Self, ConnectError> {
        let ssid = ssid.into();
        validate_ssid(&ssid)?;
        Ok(Self {
            ssid,
            secret: secret.into(),
            priority,
            last_connected: 0,
            last_signal: 0,
        })
    }

    /// Ranking order: priority descending, then strongest last signal.
    pub fn rank(a: &Self, b: &Self) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then(b.last_signal.cmp(&a.last_signal))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("ssid", &self.ssid)
            .field("secret", &"<redacted>")
            .field("priority", &self.priority)
            .field("last_connected", &self.last_connected)
            .field("last_signal", &self.last_signal)
            .finish()
    }
}

/// Security of a scanned access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionKind {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa3Psk,
    Wpa2Wpa3Psk,
    Enterprise,
    #[default]
    Unknown,
}

impl EncryptionKind {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// One access point from a completed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    /// Signal strength in dBm.
    pub signal: i8,
    pub encryption: EncryptionKind,
    pub channel: u8,
}

impl ScanResult {
    pub fn new(ssid: impl Into<String>, signal: i8) -> Self {
        Self {
            ssid: ssid.into(),
            signal,
            encryption: EncryptionKind::Wpa2Psk,
            channel: 1,
        }
    }
}

/// Order scan results strongest first, keeping discovery order for ties.
pub(crate) fn sort_scan(results: &mut [ScanResult]) {
    results.sort_by(|a, b| b.signal.cmp(&a.signal));
}

/// Persisted form of a credential.
#[derive(Serialize, Deserialize)]
struct SavedNetwork {
    ssid: String,
    pass: String,
    #[serde(default)]
    priority: i8,
    #[serde(default, rename = "lastConnected")]
    last_connected: u32,
    #[serde(default, rename = "lastRSSI")]
    last_rssi: i8,
}

/// Serialize credentials as a JSON array, secrets run through the cipher.
pub(crate) fn encode_list(networks: &[Credential], cipher: &DeviceCipher) -> String {
    let saved: Vec<SavedNetwork> = networks
        .iter()
        .map(|c| SavedNetwork {
            ssid: c.ssid.clone(),
            pass: format!("{}{}", ENC_PREFIX, cipher.encrypt(&c.secret)),
            priority: c.priority,
            last_connected: c.last_connected,
            last_rssi: c.last_signal,
        })
        .collect();
    // A Vec of plain structs always serializes.
    serde_json::to_string(&saved).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a saved list. Malformed input yields no networks; malformed entries
/// are skipped.
pub(crate) fn decode_list(json: &str, cipher: &DeviceCipher) -> Vec<Credential> {
    let saved: Vec<SavedNetwork> = match serde_json::from_str(json) {
        Ok(saved) => saved,
        Err(e) => {
            warn!("Saved networks are malformed, ignoring: {}", e);
            return Vec::new();
        }
    };

    saved
        .into_iter()
        .filter_map(|s| {
            if validate_ssid(&s.ssid).is_err() {
                warn!("Skipping saved network with invalid SSID");
                return None;
            }
            let secret = match s.pass.strip_prefix(ENC_PREFIX) {
                Some(hex) => match cipher.decrypt(hex) {
                    Ok(secret) => secret,
                    Err(e) => {
                        warn!("Cannot decrypt secret for {}: {}", s.ssid, e);
                        return None;
                    }
                },
                None => s.pass,
            };
            Some(Credential {
                ssid: s.ssid,
                secret,
                priority: s.priority,
                last_connected: s.last_connected,
                last_signal: s.last_rssi,
            })
        })
        .collect()
}
