//! Device-level entry point.
//!
//! [`Provisioner`] wires the store, cipher, configuration engine and
//! connection manager together and decides at boot whether to join a saved
//! network or ask for the provisioning portal. The portal itself (HTTP or
//! BLE) lives outside this crate; it drives the provisioner through
//! [`config_mut`](Provisioner::config_mut) and
//! [`manager_mut`](Provisioner::manager_mut) and watches
//! [`portal_active`](Provisioner::portal_active).
//!
//! ```no_run
//! use ionconnect_esp32::crypto::DeviceIdentity;
//! use ionconnect_esp32::provisioner::{BeginOutcome, Provisioner, ProvisionerConfig};
//! use ionconnect_esp32::storage::{FlatStore, MemoryRegion};
//! use ionconnect_esp32::wifi::SimRadio;
//!
//! let mut device = Provisioner::new(
//!     FlatStore::new(MemoryRegion::new(4096)),
//!     SimRadio::new(),
//!     DeviceIdentity::new([0x24, 0x6f, 0x28, 0, 0xab, 0x0c], 1),
//!     ProvisionerConfig::default(),
//! )
//! .unwrap();
//!
//! if device.begin().unwrap() == BeginOutcome::PortalRequired {
//!     println!("open portal on {}", device.portal_ssid());
//! }
//! loop {
//!     device.handle();
//! }
//! ```

use crate::config::{ConfigEngine, EngineOptions, SchemaPolicy, DEFAULT_SCHEMA};
use crate::crypto::{DeviceCipher, DeviceIdentity};
use crate::error::Error;
use crate::storage::{Store, DEFAULT_NAMESPACE};
use crate::wifi::{ConnectionConfig, ConnectionManager, ConnectionState, Radio};
use log::{info, warn};
use std::time::{Duration, Instant};

/// Config key of the access token.
pub const KEY_ACCESS_TOKEN: &str = "access_token";

/// Length of generated access tokens.
pub const ACCESS_TOKEN_LEN: usize = 32;

/// Prefix of generated portal SSIDs.
pub const PORTAL_SSID_PREFIX: &str = "IonConnect-";

/// Device-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Portal SSID; generated from the MAC when `None`.
    pub ap_ssid: Option<String>,
    /// How long the portal stays open. Zero keeps it open until stopped.
    pub portal_timeout: Duration,
    /// Request the portal at boot when no network is configured.
    pub auto_start_portal: bool,
    pub schema_policy: SchemaPolicy,
    pub connection: ConnectionConfig,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            ap_ssid: None,
            portal_timeout: Duration::from_secs(300),
            auto_start_portal: true,
            schema_policy: SchemaPolicy::Permissive,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ProvisionerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(ssid) = &self.ap_ssid {
            crate::wifi::validate_ssid(ssid)?;
        }
        self.connection.validate()?;
        Ok(())
    }
}

/// What [`Provisioner::begin`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// A saved network is being joined.
    Connecting,
    /// No network is configured; the portal should be opened.
    PortalRequired,
    /// No network is configured and the portal is not started automatically.
    Idle,
}

/// Provisioning core of one device.
pub struct Provisioner<R: Radio, S: Store> {
    manager: ConnectionManager<R, S>,
    identity: DeviceIdentity,
    config: ProvisionerConfig,
    portal_opened: Option<Instant>,
    fallback_handled: bool,
}

impl<R: Radio, S: Store> Provisioner<R, S> {
    pub fn new(
        store: S,
        radio: R,
        identity: DeviceIdentity,
        config: ProvisionerConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        let options = EngineOptions {
            namespace: DEFAULT_NAMESPACE.to_string(),
            policy: config.schema_policy,
        };
        let engine = ConfigEngine::new(store, DeviceCipher::new(&identity), options)?;
        let manager = ConnectionManager::new(radio, engine, config.connection)?;

        Ok(Self {
            manager,
            identity,
            config,
            portal_opened: None,
            fallback_handled: false,
        })
    }

    /// Replace the built-in schema. Call before [`begin`](Self::begin).
    pub fn load_schema(&mut self, json: &str) -> Result<(), Error> {
        self.manager.config_mut().load_schema(json)?;
        Ok(())
    }

    /// Load configuration and saved networks, then join or ask for the portal.
    pub fn begin(&mut self) -> Result<BeginOutcome, Error> {
        let engine = self.manager.config_mut();
        engine.begin()?;
        if !engine.has_schema() {
            engine.load_schema(DEFAULT_SCHEMA)?;
        }
        self.manager.begin();

        let ssid = self
            .manager
            .config()
            .get("wifi_ssid")
            .filter(|s| !s.is_empty());
        let Some(ssid) = ssid else {
            if self.config.auto_start_portal {
                info!("No credentials, portal required");
                self.start_portal();
                return Ok(BeginOutcome::PortalRequired);
            }
            info!("No credentials configured");
            return Ok(BeginOutcome::Idle);
        };

        let secret = self.manager.config().get_or("wifi_pass", "");
        info!("Joining saved network {}", ssid);
        self.manager.connect(&ssid, &secret)?;
        Ok(BeginOutcome::Connecting)
    }

    /// Drive the connection manager and the portal window. Call every loop.
    pub fn handle(&mut self) {
        self.handle_at(Instant::now());
    }

    /// [`handle`](Self::handle) as of `now`.
    pub fn handle_at(&mut self, now: Instant) {
        self.manager.tick_at(now);

        match self.manager.state() {
            ConnectionState::PortalFallback if !self.fallback_handled => {
                info!("Portal fallback triggered");
                self.fallback_handled = true;
                self.start_portal_at(now);
            }
            ConnectionState::PortalFallback => {}
            ConnectionState::Connected => {
                self.fallback_handled = false;
                if self.portal_opened.is_some() {
                    info!("Connected, closing portal");
                    self.stop_portal();
                }
            }
            _ => self.fallback_handled = false,
        }

        if let Some(opened) = self.portal_opened {
            let timeout = self.config.portal_timeout;
            if !timeout.is_zero() && now.saturating_duration_since(opened) > timeout {
                info!("Portal timeout");
                self.portal_opened = None;
            }
        }
    }

    /// Join the network stored in `wifi_ssid`/`wifi_pass`.
    pub fn connect(&mut self) -> Result<(), Error> {
        let ssid = self
            .manager
            .config()
            .get("wifi_ssid")
            .filter(|s| !s.is_empty())
            .ok_or(Error::NoCredentials)?;
        let secret = self.manager.config().get_or("wifi_pass", "");
        self.manager.connect(&ssid, &secret)?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.manager.disconnect();
    }

    /// Forget all configuration and saved networks.
    pub fn reset(&mut self) -> Result<(), Error> {
        warn!("Resetting configuration");
        self.manager.disconnect();
        self.manager.config_mut().clear()?;
        self.manager.clear_networks()?;
        Ok(())
    }

    /// Mark the portal as open.
    pub fn start_portal(&mut self) {
        self.start_portal_at(Instant::now());
    }

    fn start_portal_at(&mut self, now: Instant) {
        if self.portal_opened.is_none() {
            info!("Portal requested: {}", self.portal_ssid());
            self.portal_opened = Some(now);
        }
    }

    pub fn stop_portal(&mut self) {
        self.portal_opened = None;
    }

    /// Whether the portal should be serving.
    pub fn portal_active(&self) -> bool {
        self.portal_opened.is_some()
    }

    /// SSID the portal access point advertises.
    pub fn portal_ssid(&self) -> String {
        match &self.config.ap_ssid {
            Some(ssid) => ssid.clone(),
            None => format!("{}{}", PORTAL_SSID_PREFIX, self.identity.short_suffix()),
        }
    }

    /// Stored API access token, generated and saved on first use.
    pub fn access_token(&mut self) -> Result<String, Error> {
        if let Some(token) = self
            .manager
            .config()
            .get(KEY_ACCESS_TOKEN)
            .filter(|t| !t.is_empty())
        {
            return Ok(token);
        }

        let token = DeviceCipher::generate_token(ACCESS_TOKEN_LEN);
        let engine = self.manager.config_mut();
        engine.set(KEY_ACCESS_TOKEN, &token)?;
        engine.save()?;
        info!("Generated new access token");
        Ok(token)
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager<R, S> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ConnectionManager<R, S> {
        &mut self.manager
    }

    pub fn config(&self) -> &ConfigEngine<S> {
        self.manager.config()
    }

    pub fn config_mut(&mut self) -> &mut ConfigEngine<S> {
        self.manager.config_mut()
    }
}
