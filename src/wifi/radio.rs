//! Radio abstraction and the link-event channel.
//!
//! The connection manager drives a [`Radio`] and learns about link changes
//! through [`LinkEvent`]s pushed into an unbounded channel. Platform adapters
//! push from their own event callbacks; [`SimRadio`] pushes synchronously.

use super::credential::{sort_scan, EncryptionKind, ScanResult};
use std::fmt;
use tokio::sync::mpsc;

/// Link status change reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Station associated and has an address.
    Up { ssid: String, rssi: i8 },
    /// Station lost its association.
    Down,
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Create a link-event channel.
pub fn link_channel() -> (LinkEventSender, LinkEventReceiver) {
    mpsc::unbounded_channel()
}

/// Station-mode radio.
///
/// All calls return promptly. Connection outcome arrives as a [`LinkEvent`];
/// scan completion is polled.
pub trait Radio {
    /// Hand the radio the sender it reports link changes on.
    fn attach(&mut self, events: LinkEventSender) -> Result<(), RadioError>;

    /// Start joining a network.
    fn begin_connect(&mut self, ssid: &str, secret: &str) -> Result<(), RadioError>;

    /// Drop the current association, if any.
    fn disconnect(&mut self) -> Result<(), RadioError>;

    /// Start an asynchronous scan.
    fn start_scan(&mut self) -> Result<(), RadioError>;

    /// Results of the last started scan, once, after it completes.
    fn poll_scan(&mut self) -> Option<Vec<ScanResult>>;

    /// Signal of the current association in dBm.
    fn rssi(&self) -> Option<i8>;
}

/// Errors reported by a radio.
#[derive(Debug)]
pub enum RadioError {
    /// SSID rejected by the driver.
    InvalidSsid,
    /// Secret rejected by the driver.
    InvalidPassword,
    /// Scan could not be started.
    ScanFailed(String),
    /// Driver refused the request.
    Driver(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::ScanFailed(msg) => write!(f, "scan failed: {}", msg),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for RadioError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for RadioError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

/// An access point visible to [`SimRadio`].
#[derive(Debug, Clone)]
pub struct SimNetwork {
    pub ssid: String,
    pub secret: String,
    pub signal: i8,
    pub encryption: EncryptionKind,
    pub channel: u8,
}

/// Scripted in-memory radio for tests and the host simulator.
///
/// A connect succeeds immediately (a [`LinkEvent::Up`] is pushed) when the
/// network is in range, the secret matches and joins are not blocked.
/// Otherwise nothing happens and the caller's timeout applies.
#[derive(Debug, Default)]
pub struct SimRadio {
    networks: Vec<SimNetwork>,
    events: Option<LinkEventSender>,
    associated: Option<(String, i8)>,
    scan_pending: bool,
    scan_latency: u32,
    scan_polls: u32,
    block_joins: bool,
    attempts: Vec<String>,
    scans_started: usize,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an access point in range (replacing one with the same SSID).
    pub fn add_network(&mut self, ssid: &str, secret: &str, signal: i8) {
        self.remove_network(ssid);
        self.networks.push(SimNetwork {
            ssid: ssid.to_string(),
            secret: secret.to_string(),
            signal,
            encryption: if secret.is_empty() {
                EncryptionKind::Open
            } else {
                EncryptionKind::Wpa2Psk
            },
            channel: (self.networks.len() % 13 + 1) as u8,
        });
    }

    /// Take an access point out of range. Drops the link if associated to it.
    pub fn remove_network(&mut self, ssid: &str) {
        self.networks.retain(|n| n.ssid != ssid);
        if self.associated.as_ref().is_some_and(|(s, _)| s == ssid) {
            self.drop_link();
        }
    }

    /// Change the signal of an access point in range.
    pub fn set_signal(&mut self, ssid: &str, signal: i8) {
        if let Some(n) = self.networks.iter_mut().find(|n| n.ssid == ssid) {
            n.signal = signal;
        }
    }

    /// Number of polls a scan takes to complete (0 = first poll).
    pub fn set_scan_latency(&mut self, polls: u32) {
        self.scan_latency = polls;
    }

    /// Make joins silently fail (as if the AP never answered).
    pub fn set_block_joins(&mut self, block: bool) {
        self.block_joins = block;
    }

    /// Lose the association, reporting [`LinkEvent::Down`].
    pub fn drop_link(&mut self) {
        if self.associated.take().is_some() {
            self.send(LinkEvent::Down);
        }
    }

    /// SSIDs passed to `begin_connect`, in order.
    pub fn attempts(&self) -> &[String] {
        &self.attempts
    }

    pub fn scans_started(&self) -> usize {
        self.scans_started
    }

    fn send(&self, event: LinkEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                log::debug!("Link event receiver dropped");
            }
        }
    }
}

impl Radio for SimRadio {
    fn attach(&mut self, events: LinkEventSender) -> Result<(), RadioError> {
        self.events = Some(events);
        Ok(())
    }

    fn begin_connect(&mut self, ssid: &str, secret: &str) -> Result<(), RadioError> {
        self.attempts.push(ssid.to_string());
        self.associated = None;

        if self.block_joins {
            return Ok(());
        }
        let joined = self
            .networks
            .iter()
            .find(|n| n.ssid == ssid && n.secret == secret)
            .map(|n| (n.ssid.clone(), n.signal));
        if let Some((ssid, signal)) = joined {
            self.associated = Some((ssid.clone(), signal));
            self.send(LinkEvent::Up { ssid, rssi: signal });
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        self.drop_link();
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), RadioError> {
        self.scan_pending = true;
        self.scan_polls = 0;
        self.scans_started += 1;
        Ok(())
    }

    fn poll_scan(&mut self) -> Option<Vec<ScanResult>> {
        if !self.scan_pending {
            return None;
        }
        if self.scan_polls < self.scan_latency {
            self.scan_polls += 1;
            return None;
        }
        self.scan_pending = false;
        let mut results: Vec<ScanResult> = self
            .networks
            .iter()
            .map(|n| ScanResult {
                ssid: n.ssid.clone(),
                signal: n.signal,
                encryption: n.encryption,
                channel: n.channel,
            })
            .collect();
        sort_scan(&mut results);
        Some(results)
    }

    fn rssi(&self) -> Option<i8> {
        self.associated.as_ref().map(|(_, rssi)| *rssi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_pushes_up() {
        let (tx, mut rx) = link_channel();
        let mut radio = SimRadio::new();
        radio.attach(tx).unwrap();
        radio.add_network("Home", "password1", -55);

        radio.begin_connect("Home", "wrong").unwrap();
        assert!(rx.try_recv().is_err());

        radio.begin_connect("Home", "password1").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::Up {
                ssid: "Home".into(),
                rssi: -55
            }
        );
        assert_eq!(radio.rssi(), Some(-55));

        radio.remove_network("Home");
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Down);
        assert_eq!(radio.rssi(), None);
    }

    #[test]
    fn test_scan_latency() {
        let mut radio = SimRadio::new();
        radio.add_network("A", "", -70);
        radio.add_network("B", "", -40);
        radio.set_scan_latency(2);

        assert!(radio.poll_scan().is_none());
        radio.start_scan().unwrap();
        assert!(radio.poll_scan().is_none());
        assert!(radio.poll_scan().is_none());
        let results = radio.poll_scan().unwrap();
        assert_eq!(results[0].ssid, "B");
        assert!(results[1].encryption.is_open());
        assert!(radio.poll_scan().is_none());
    }

    #[test]
    fn test_blocked_joins() {
        let (tx, mut rx) = link_channel();
        let mut radio = SimRadio::new();
        radio.attach(tx).unwrap();
        radio.add_network("Home", "", -50);
        radio.set_block_joins(true);
        radio.begin_connect("Home", "").unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(radio.attempts(), ["Home".to_string()]);
    }
}
