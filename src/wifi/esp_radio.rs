//! ESP-IDF station radio.
//!
//! Wraps a non-blocking [`EspWifi`] driver. Link changes come from the system
//! event loop: an IP assignment reports [`LinkEvent::Up`] and a station
//! disconnect reports [`LinkEvent::Down`].

use super::credential::{EncryptionKind, ScanResult};
use super::radio::{LinkEvent, LinkEventSender, Radio, RadioError};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointInfo, AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent,
};
use log::{debug, info, warn};

/// Station radio on the ESP32 modem.
pub struct EspRadio<'d> {
    wifi: EspWifi<'d>,
    sysloop: EspSystemEventLoop,
    subscriptions: Vec<EspSubscription<'static, System>>,
    scanning: bool,
}

impl<'d> EspRadio<'d> {
    /// Bring the driver up in station mode.
    ///
    /// Pass the NVS partition to let the driver keep its calibration data.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, RadioError> {
        let mut wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        wifi.start()?;
        info!("WiFi driver started");

        Ok(Self {
            wifi,
            sysloop,
            subscriptions: Vec::new(),
            scanning: false,
        })
    }
}

/// Associated AP as reported by the driver.
fn ap_record() -> Option<(String, i8)> {
    // SAFETY: wifi_ap_record_t is a plain C struct; all-zero is a valid value
    // and the driver fills it in place.
    let mut record: esp_idf_sys::wifi_ap_record_t = unsafe { core::mem::zeroed() };
    esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut record) }).ok()?;
    let len = record
        .ssid
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(record.ssid.len());
    Some((
        String::from_utf8_lossy(&record.ssid[..len]).into_owned(),
        record.rssi,
    ))
}

fn encryption_of(auth: Option<AuthMethod>) -> EncryptionKind {
    match auth {
        Some(AuthMethod::None) => EncryptionKind::Open,
        Some(AuthMethod::WEP) => EncryptionKind::Wep,
        Some(AuthMethod::WPA) => EncryptionKind::WpaPsk,
        Some(AuthMethod::WPA2Personal) => EncryptionKind::Wpa2Psk,
        Some(AuthMethod::WPAWPA2Personal) => EncryptionKind::WpaWpa2Psk,
        Some(AuthMethod::WPA3Personal) => EncryptionKind::Wpa3Psk,
        Some(AuthMethod::WPA2WPA3Personal) => EncryptionKind::Wpa2Wpa3Psk,
        Some(AuthMethod::WPA2Enterprise) => EncryptionKind::Enterprise,
        _ => EncryptionKind::Unknown,
    }
}

fn scan_result(ap: &AccessPointInfo) -> ScanResult {
    ScanResult {
        ssid: ap.ssid.as_str().to_string(),
        signal: ap.signal_strength,
        encryption: encryption_of(ap.auth_method),
        channel: ap.channel,
    }
}

impl Radio for EspRadio<'_> {
    fn attach(&mut self, events: LinkEventSender) -> Result<(), RadioError> {
        let up = events.clone();
        let ip_sub = self.sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(_) = event {
                if let Some((ssid, rssi)) = ap_record() {
                    let _ = up.send(LinkEvent::Up { ssid, rssi });
                }
            }
        })?;

        let down = events;
        let wifi_sub = self.sysloop.subscribe::<WifiEvent, _>(move |event| {
            if let WifiEvent::StaDisconnected(_) = event {
                let _ = down.send(LinkEvent::Down);
            }
        })?;

        self.subscriptions.push(ip_sub);
        self.subscriptions.push(wifi_sub);
        debug!("Subscribed to WiFi and IP events");
        Ok(())
    }

    fn begin_connect(&mut self, ssid: &str, secret: &str) -> Result<(), RadioError> {
        let auth_method = if secret.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| RadioError::InvalidSsid)?,
            password: secret.try_into().map_err(|_| RadioError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });

        if self.wifi.is_connected().unwrap_or(false) {
            self.wifi.disconnect()?;
        }
        self.wifi.set_configuration(&config)?;
        self.wifi.connect()?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        self.wifi.disconnect()?;
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), RadioError> {
        self.wifi.start_scan(&Default::default(), false)?;
        self.scanning = true;
        Ok(())
    }

    fn poll_scan(&mut self) -> Option<Vec<ScanResult>> {
        if !self.scanning || !self.wifi.is_scan_done().unwrap_or(false) {
            return None;
        }
        self.scanning = false;
        match self.wifi.get_scan_result() {
            Ok(aps) => Some(aps.iter().map(scan_result).collect()),
            Err(e) => {
                warn!("Reading scan results failed: {:?}", e);
                Some(Vec::new())
            }
        }
    }

    fn rssi(&self) -> Option<i8> {
        ap_record().map(|(_, rssi)| rssi)
    }
}
