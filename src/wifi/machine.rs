//! Connection state machine.
//!
//! [`ConnectionManager`] is driven by [`tick`](ConnectionManager::tick) from
//! the application loop. Each tick drains pending link events, collects
//! finished scans, then advances the current state:
//!
//! ```text
//!  Idle --start_scan--> Scanning --scan done--> Idle
//!  any --connect--> Connecting --link up--> Connected
//!  Connecting --timeout--> Reconnecting
//!  Connected --link down--> Reconnecting
//!  Reconnecting --delay elapsed--> Connecting (best known network)
//!  Reconnecting --attempts > max--> PortalFallback
//!  any --disconnect--> Disconnected
//! ```
//!
//! Credentials are persisted through the owned [`ConfigEngine`] under
//! [`KEY_SAVED_NETWORKS`].

use super::backoff::Backoff;
use super::credential::{
    decode_list, encode_list, sort_scan, validate_ssid, Credential, ScanResult, CONNECT_PRIORITY,
    MAX_NETWORKS,
};
use super::radio::{
    link_channel, LinkEvent, LinkEventReceiver, LinkEventSender, Radio, RadioError,
};
use super::state::{ConnectionEvent, ConnectionState};
use crate::config::{unix_time, ConfigEngine, ConfigError};
use crate::storage::Store;
use log::{debug, info, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// Config key holding the saved network list.
pub const KEY_SAVED_NETWORKS: &str = "saved_networks";

/// Poll interval while waiting for a scan during best-network selection.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connection manager settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Failed attempts allowed in one episode before portal fallback.
    pub max_reconnect_attempts: u8,
    /// First backoff delay.
    pub reconnect_delay: Duration,
    /// Backoff cap.
    pub max_reconnect_delay: Duration,
    /// How long a join may take before it counts as failed.
    pub connection_timeout: Duration,
    /// Longest blocking wait for a scan during best-network selection.
    pub scan_wait: Duration,
    /// Retry after timeout or link loss instead of going to `Disconnected`.
    pub auto_reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(32),
            connection_timeout: Duration::from_secs(10),
            scan_wait: Duration::from_secs(5),
            auto_reconnect: true,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.max_reconnect_attempts == 0 {
            return Err(ConnectError::InvalidConfig(
                "max_reconnect_attempts must be > 0",
            ));
        }
        if self.reconnect_delay.is_zero() {
            return Err(ConnectError::InvalidConfig("reconnect_delay must be > 0"));
        }
        if self.max_reconnect_delay < self.reconnect_delay {
            return Err(ConnectError::InvalidConfig(
                "max_reconnect_delay must be >= reconnect_delay",
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(ConnectError::InvalidConfig(
                "connection_timeout must be > 0",
            ));
        }
        Ok(())
    }
}

type Subscriber = Box<dyn FnMut(&ConnectionEvent)>;

/// Station connection manager.
pub struct ConnectionManager<R: Radio, S: Store> {
    radio: R,
    config: ConfigEngine<S>,
    settings: ConnectionConfig,

    state: ConnectionState,
    previous_state: ConnectionState,

    networks: Vec<Credential>,
    scan_results: Vec<ScanResult>,
    scan_complete: bool,
    scan_in_progress: bool,

    backoff: Backoff,
    connect_started: Option<Instant>,
    last_attempt: Option<Instant>,
    connected_since: Option<Instant>,
    current_ssid: Option<String>,

    link_tx: LinkEventSender,
    link_rx: LinkEventReceiver,
    subscribers: Vec<Subscriber>,
}

impl<R: Radio, S: Store> ConnectionManager<R, S> {
    /// Create a manager. Attaches the radio to a fresh link-event channel.
    pub fn new(
        mut radio: R,
        config: ConfigEngine<S>,
        settings: ConnectionConfig,
    ) -> Result<Self, ConnectError> {
        settings.validate()?;
        let (link_tx, link_rx) = link_channel();
        radio.attach(link_tx.clone())?;

        Ok(Self {
            radio,
            config,
            settings,
            state: ConnectionState::Idle,
            previous_state: ConnectionState::Idle,
            networks: Vec::new(),
            scan_results: Vec::new(),
            scan_complete: false,
            scan_in_progress: false,
            backoff: Backoff::new(settings.reconnect_delay, settings.max_reconnect_delay),
            connect_started: None,
            last_attempt: None,
            connected_since: None,
            current_ssid: None,
            link_tx,
            link_rx,
            subscribers: Vec::new(),
        })
    }

    /// Load saved networks.
    pub fn begin(&mut self) {
        self.load_networks();
        info!(
            "Connection manager ready ({} saved networks)",
            self.networks.len()
        );
    }

    /// Shut the radio link down.
    pub fn end(&mut self) {
        self.disconnect();
    }

    /// Register an event callback. Callbacks run in registration order.
    pub fn subscribe(&mut self, callback: impl FnMut(&ConnectionEvent) + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    /// Sender for platform code reporting link changes.
    pub fn link_sender(&self) -> LinkEventSender {
        self.link_tx.clone()
    }

    // ---- settings ----

    pub fn settings(&self) -> &ConnectionConfig {
        &self.settings
    }

    /// Replace all settings. Backoff limits apply from the next episode.
    pub fn set_settings(&mut self, settings: ConnectionConfig) -> Result<(), ConnectError> {
        settings.validate()?;
        self.settings = settings;
        self.backoff
            .reconfigure(settings.reconnect_delay, settings.max_reconnect_delay);
        Ok(())
    }

    pub fn set_max_reconnect_attempts(&mut self, attempts: u8) -> Result<(), ConnectError> {
        self.set_settings(ConnectionConfig {
            max_reconnect_attempts: attempts,
            ..self.settings
        })
    }

    pub fn set_reconnect_delay(&mut self, delay: Duration) -> Result<(), ConnectError> {
        self.set_settings(ConnectionConfig {
            reconnect_delay: delay,
            ..self.settings
        })
    }

    pub fn set_connection_timeout(&mut self, timeout: Duration) -> Result<(), ConnectError> {
        self.set_settings(ConnectionConfig {
            connection_timeout: timeout,
            ..self.settings
        })
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.settings.auto_reconnect = enabled;
    }

    // ---- accessors ----

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn previous_state(&self) -> ConnectionState {
        self.previous_state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Saved networks, best ranked first.
    pub fn saved_networks(&self) -> &[Credential] {
        &self.networks
    }

    /// Latest completed scan, strongest first.
    pub fn scan_results(&self) -> &[ScanResult] {
        &self.scan_results
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_in_progress
    }

    pub fn current_ssid(&self) -> Option<&str> {
        self.current_ssid.as_deref()
    }

    /// Signal of the current link in dBm.
    pub fn rssi(&self) -> Option<i8> {
        if self.is_connected() {
            self.radio.rssi()
        } else {
            None
        }
    }

    pub fn reconnect_attempts(&self) -> u8 {
        self.backoff.attempts()
    }

    /// Delay before the next reconnect attempt.
    pub fn backoff_delay(&self) -> Duration {
        self.backoff.delay()
    }

    /// Time since the current link came up.
    pub fn uptime(&self) -> Duration {
        match (self.state, self.connected_since) {
            (ConnectionState::Connected, Some(since)) => since.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn config(&self) -> &ConfigEngine<S> {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigEngine<S> {
        &mut self.config
    }

    // ---- commands ----

    /// Join `ssid` now and remember it with top priority.
    ///
    /// Starts a new reconnect episode, so this also leaves `PortalFallback`.
    pub fn connect(&mut self, ssid: &str, secret: &str) -> Result<(), ConnectError> {
        validate_ssid(ssid)?;
        info!("Connecting to {}", ssid);

        self.upsert(Credential::new(ssid, secret, CONNECT_PRIORITY)?)?;
        if let Err(e) = self.save_networks() {
            warn!("Failed to persist networks: {}", e);
        }

        self.backoff.reset();
        self.last_attempt = None;
        self.attempt(ssid, secret, Instant::now())?;
        Ok(())
    }

    /// Join the strongest saved network from the latest scan.
    ///
    /// Returns false when no scanned network has a saved credential.
    pub fn connect_to_best(&mut self) -> bool {
        let Some((ssid, secret)) = self.select_best() else {
            info!("No known networks in range");
            return false;
        };
        info!("Connecting to best network {}", ssid);
        match self.attempt(&ssid, &secret, Instant::now()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Connect to {} failed: {}", ssid, e);
                false
            }
        }
    }

    /// Drop the link and stay down until the next `connect`.
    pub fn disconnect(&mut self) {
        if let Err(e) = self.radio.disconnect() {
            warn!("Radio disconnect failed: {}", e);
        }
        self.current_ssid = None;
        self.connect_started = None;
        self.connected_since = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Start an asynchronous scan. Returns false if one is already running.
    pub fn start_scan(&mut self) -> Result<bool, RadioError> {
        if self.scan_in_progress {
            return Ok(false);
        }
        self.radio.start_scan()?;
        self.scan_in_progress = true;
        if self.state == ConnectionState::Idle {
            self.set_state(ConnectionState::Scanning);
        }
        debug!("Scan started");
        Ok(true)
    }

    // ---- networks ----

    /// Add or update a saved network and persist the list.
    pub fn add_network(
        &mut self,
        ssid: &str,
        secret: &str,
        priority: i8,
    ) -> Result<(), ConnectError> {
        self.upsert(Credential::new(ssid, secret, priority)?)?;
        self.save_networks()?;
        Ok(())
    }

    /// Forget a saved network. Returns whether it was known.
    pub fn remove_network(&mut self, ssid: &str) -> Result<bool, ConnectError> {
        let before = self.networks.len();
        self.networks.retain(|c| c.ssid != ssid);
        if self.networks.len() == before {
            return Ok(false);
        }
        self.save_networks()?;
        Ok(true)
    }

    /// Persist the saved network list.
    pub fn save_networks(&mut self) -> Result<(), ConfigError> {
        let json = encode_list(&self.networks, self.config.cipher());
        self.config.set(KEY_SAVED_NETWORKS, &json)?;
        self.config.save()
    }

    /// Replace the in-memory list with the persisted one.
    pub fn load_networks(&mut self) {
        self.networks = match self.config.get(KEY_SAVED_NETWORKS) {
            Some(json) => decode_list(&json, self.config.cipher()),
            None => Vec::new(),
        };
        self.networks.sort_by(Credential::rank);
        debug!("Loaded {} saved networks", self.networks.len());
    }

    /// Forget every saved network and persist the empty list.
    pub fn clear_networks(&mut self) -> Result<(), ConfigError> {
        self.networks.clear();
        self.save_networks()
    }

    // ---- driving ----

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Advance the machine as of `now`.
    pub fn tick_at(&mut self, now: Instant) {
        while let Ok(event) = self.link_rx.try_recv() {
            self.on_link_event(event, now);
        }

        if self.scan_in_progress {
            if let Some(results) = self.radio.poll_scan() {
                self.store_scan(results);
            }
        }

        match self.state {
            ConnectionState::Connecting => {
                let timeout = self.settings.connection_timeout;
                let timed_out = self
                    .connect_started
                    .map_or(true, |t| now.saturating_duration_since(t) >= timeout);
                if timed_out {
                    warn!("Connection attempt timed out");
                    self.connect_started = None;
                    self.link_lost();
                }
            }
            ConnectionState::Reconnecting => self.reconnect_step(now),
            _ => {}
        }
    }

    fn on_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Up { ssid, rssi } => match self.state {
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    self.on_connected(ssid, rssi, now)
                }
                state => debug!("Ignoring link up for {} while {}", ssid, state),
            },
            LinkEvent::Down => {
                if self.state == ConnectionState::Connected {
                    warn!("Link to {} lost", self.current_ssid.as_deref().unwrap_or("?"));
                    self.current_ssid = None;
                    self.connected_since = None;
                    self.emit(ConnectionEvent::Disconnected);
                    // Retry immediately after losing an established link.
                    self.last_attempt = None;
                    self.link_lost();
                } else {
                    debug!("Ignoring link down while {}", self.state);
                }
            }
        }
    }

    fn on_connected(&mut self, ssid: String, rssi: i8, now: Instant) {
        info!("Connected to {} ({} dBm)", ssid, rssi);
        self.backoff.reset();
        self.last_attempt = None;
        self.connect_started = None;
        self.connected_since = Some(now);

        if let Some(cred) = self.networks.iter_mut().find(|c| c.ssid == ssid) {
            cred.last_connected = unix_time();
            cred.last_signal = rssi;
        }
        self.networks.sort_by(Credential::rank);
        if let Err(e) = self.save_networks() {
            warn!("Failed to persist networks: {}", e);
        }

        self.current_ssid = Some(ssid.clone());
        self.set_state(ConnectionState::Connected);
        self.emit(ConnectionEvent::Connected { ssid });
    }

    /// Timeout or loss: retry, or stay down if auto-reconnect is off.
    fn link_lost(&mut self) {
        if self.settings.auto_reconnect {
            self.set_state(ConnectionState::Reconnecting);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn reconnect_step(&mut self, now: Instant) {
        let ready = self
            .last_attempt
            .map_or(true, |t| now.saturating_duration_since(t) >= self.backoff.delay());
        if !ready {
            return;
        }

        self.last_attempt = Some(now);
        let attempt = self.backoff.record_attempt();
        if attempt > self.settings.max_reconnect_attempts {
            warn!(
                "Giving up after {} reconnect attempts",
                self.settings.max_reconnect_attempts
            );
            self.set_state(ConnectionState::PortalFallback);
            self.emit(ConnectionEvent::PortalFallback);
            return;
        }

        info!(
            "Reconnect attempt {}/{}",
            attempt, self.settings.max_reconnect_attempts
        );
        self.emit(ConnectionEvent::ReconnectAttempt(attempt));

        match self.select_best() {
            Some((ssid, secret)) => {
                if let Err(e) = self.attempt(&ssid, &secret, now) {
                    warn!("Connect to {} failed: {}", ssid, e);
                }
            }
            None => info!("No known networks in range"),
        }
        self.backoff.grow();
    }

    /// Start joining without touching the reconnect episode.
    fn attempt(&mut self, ssid: &str, secret: &str, now: Instant) -> Result<(), RadioError> {
        self.current_ssid = None;
        self.connect_started = Some(now);
        self.set_state(ConnectionState::Connecting);
        self.radio.begin_connect(ssid, secret)
    }

    /// Pick the strongest scanned network that has a saved credential.
    ///
    /// Without a completed scan, scans and waits up to `scan_wait`.
    fn select_best(&mut self) -> Option<(String, String)> {
        if !self.scan_complete {
            self.wait_for_scan();
        }

        let mut best: Option<(usize, i8)> = None;
        for result in &self.scan_results {
            let Some(idx) = self.networks.iter().position(|c| c.ssid == result.ssid) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((best_idx, best_signal)) => {
                    result.signal > best_signal
                        || (result.signal == best_signal
                            && self.networks[idx].priority > self.networks[best_idx].priority)
                }
            };
            if better {
                best = Some((idx, result.signal));
            }
        }

        let (idx, signal) = best?;
        let cred = &mut self.networks[idx];
        cred.last_signal = signal;
        debug!("Best network {} ({} dBm)", cred.ssid, signal);
        Some((cred.ssid.clone(), cred.secret.clone()))
    }

    fn wait_for_scan(&mut self) {
        if !self.scan_in_progress {
            if let Err(e) = self.radio.start_scan() {
                warn!("Scan failed to start: {}", e);
                return;
            }
            self.scan_in_progress = true;
        }

        let deadline = Instant::now() + self.settings.scan_wait;
        loop {
            if let Some(results) = self.radio.poll_scan() {
                self.store_scan(results);
                return;
            }
            if Instant::now() >= deadline {
                warn!("Scan did not complete within {:?}", self.settings.scan_wait);
                return;
            }
            std::thread::sleep(SCAN_POLL_INTERVAL);
        }
    }

    fn store_scan(&mut self, mut results: Vec<ScanResult>) {
        sort_scan(&mut results);
        info!("Scan complete: {} networks", results.len());
        self.scan_results = results;
        self.scan_complete = true;
        self.scan_in_progress = false;
        if self.state == ConnectionState::Scanning {
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Insert or update a credential. A full list refuses new SSIDs.
    fn upsert(&mut self, cred: Credential) -> Result<(), ConnectError> {
        if let Some(existing) = self.networks.iter_mut().find(|c| c.ssid == cred.ssid) {
            existing.secret = cred.secret;
            existing.priority = cred.priority;
        } else if self.networks.len() >= MAX_NETWORKS {
            warn!("Network list full, not adding {}", cred.ssid);
            return Err(ConnectError::ListFull(cred.ssid));
        } else {
            self.networks.push(cred);
        }
        self.networks.sort_by(Credential::rank);
        Ok(())
    }

    fn set_state(&mut self, state: ConnectionState) {
        if state == self.state {
            return;
        }
        info!("WiFi state: {} -> {}", self.state, state);
        self.previous_state = self.state;
        self.state = state;
    }

    fn emit(&mut self, event: ConnectionEvent) {
        for subscriber in self.subscribers.iter_mut() {
            subscriber(&event);
        }
    }
}

impl<R: Radio, S: Store> fmt::Debug for ConnectionManager<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("previous_state", &self.previous_state)
            .field("networks", &self.networks.len())
            .field("attempts", &self.backoff.attempts())
            .field("current_ssid", &self.current_ssid)
            .finish_non_exhaustive()
    }
}

/// Connection manager errors.
#[derive(Debug)]
pub enum ConnectError {
    /// SSID empty or longer than 32 bytes.
    InvalidSsid(String),
    /// Settings rejected.
    InvalidConfig(&'static str),
    /// The saved list already holds `MAX_NETWORKS` other SSIDs.
    ListFull(String),
    /// Radio refused the request.
    Radio(RadioError),
    /// Credentials could not be persisted.
    Config(ConfigError),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid(ssid) => write!(f, "invalid SSID {:?} (must be 1-32 bytes)", ssid),
            Self::InvalidConfig(msg) => write!(f, "invalid connection config: {}", msg),
            Self::ListFull(ssid) => write!(
                f,
                "cannot save {:?}: {} networks already saved",
                ssid, MAX_NETWORKS
            ),
            Self::Radio(e) => write!(f, "radio error: {}", e),
            Self::Config(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Radio(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RadioError> for ConnectError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

impl From<ConfigError> for ConnectError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::crypto::{DeviceCipher, DeviceIdentity};
    use crate::storage::{FlatStore, MemoryRegion};
    use crate::wifi::SimRadio;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Manager = ConnectionManager<SimRadio, FlatStore<MemoryRegion>>;

    fn manager(radio: SimRadio, settings: ConnectionConfig) -> Manager {
        let cipher = DeviceCipher::new(&DeviceIdentity::new([2, 4, 6, 8, 10, 12], 77));
        let store = FlatStore::new(MemoryRegion::new(4096));
        let mut engine = ConfigEngine::new(store, cipher, EngineOptions::default()).unwrap();
        engine.begin().unwrap();
        let mut m = ConnectionManager::new(radio, engine, settings).unwrap();
        m.begin();
        m
    }

    fn record(m: &mut Manager) -> Rc<RefCell<Vec<ConnectionEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        m.subscribe(move |e| sink.borrow_mut().push(e.clone()));
        events
    }

    #[test]
    fn test_config_validate() {
        assert!(ConnectionConfig::default().validate().is_ok());
        let bad = ConnectionConfig {
            max_reconnect_delay: Duration::from_millis(10),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ConnectError::InvalidConfig(_))));
    }

    #[test]
    fn test_connect_success() {
        let mut radio = SimRadio::new();
        radio.add_network("Home", "password1", -48);
        let mut m = manager(radio, ConnectionConfig::default());
        let events = record(&mut m);

        m.connect("Home", "password1").unwrap();
        assert_eq!(m.state(), ConnectionState::Connecting);
        m.tick();
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(m.previous_state(), ConnectionState::Connecting);
        assert_eq!(m.current_ssid(), Some("Home"));
        assert_eq!(m.rssi(), Some(-48));
        assert_eq!(
            events.borrow().as_slice(),
            [ConnectionEvent::Connected { ssid: "Home".into() }]
        );

        let saved = &m.saved_networks()[0];
        assert_eq!(saved.priority, CONNECT_PRIORITY);
        assert_eq!(saved.last_signal, -48);
        assert!(saved.last_connected > 0);
    }

    #[test]
    fn test_invalid_ssid() {
        let mut m = manager(SimRadio::new(), ConnectionConfig::default());
        assert!(matches!(m.connect("", "x"), Err(ConnectError::InvalidSsid(_))));
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(m.saved_networks().is_empty());
    }

    #[test]
    fn test_timeout_then_backoff() {
        let mut radio = SimRadio::new();
        radio.add_network("Home", "password1", -60);
        radio.set_block_joins(true);
        let mut m = manager(radio, ConnectionConfig::default());

        m.connect("Home", "password1").unwrap();
        let t0 = Instant::now();
        m.tick_at(t0 + Duration::from_secs(5));
        assert_eq!(m.state(), ConnectionState::Connecting);

        m.tick_at(t0 + Duration::from_secs(11));
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        // First retry of the episode happens immediately.
        m.tick_at(t0 + Duration::from_secs(11));
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.reconnect_attempts(), 1);
        assert_eq!(m.backoff_delay(), Duration::from_secs(2));
        assert_eq!(m.radio().attempts().len(), 2);
    }

    #[test]
    fn test_scan_transitions() {
        let mut radio = SimRadio::new();
        radio.add_network("A", "", -70);
        radio.set_scan_latency(1);
        let mut m = manager(radio, ConnectionConfig::default());

        assert!(m.start_scan().unwrap());
        assert_eq!(m.state(), ConnectionState::Scanning);
        assert!(!m.start_scan().unwrap());
        m.tick();
        assert_eq!(m.state(), ConnectionState::Scanning);
        m.tick();
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.scan_results().len(), 1);
    }

    #[test]
    fn test_link_loss_reconnects() {
        let mut radio = SimRadio::new();
        radio.add_network("Home", "password1", -50);
        let mut m = manager(radio, ConnectionConfig::default());
        let events = record(&mut m);

        m.connect("Home", "password1").unwrap();
        m.tick();
        m.radio_mut().drop_link();
        m.tick();
        // Link loss retries within the same tick.
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.previous_state(), ConnectionState::Reconnecting);
        assert_eq!(m.reconnect_attempts(), 1);
        assert_eq!(m.current_ssid(), None);

        m.tick();
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(m.reconnect_attempts(), 0);
        assert_eq!(
            events.borrow().as_slice(),
            [
                ConnectionEvent::Connected { ssid: "Home".into() },
                ConnectionEvent::Disconnected,
                ConnectionEvent::ReconnectAttempt(1),
                ConnectionEvent::Connected { ssid: "Home".into() },
            ]
        );
    }

    #[test]
    fn test_no_auto_reconnect() {
        let mut radio = SimRadio::new();
        radio.add_network("Home", "password1", -50);
        let mut m = manager(radio, ConnectionConfig::default());
        m.set_auto_reconnect(false);

        m.connect("Home", "password1").unwrap();
        m.tick();
        m.radio_mut().drop_link();
        m.tick();
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect() {
        let mut radio = SimRadio::new();
        radio.add_network("Home", "password1", -50);
        let mut m = manager(radio, ConnectionConfig::default());
        m.connect("Home", "password1").unwrap();
        m.tick();
        m.disconnect();
        m.tick();
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.uptime(), Duration::ZERO);
    }

    #[test]
    fn test_full_network_list_refuses_new_ssids() {
        let mut m = manager(SimRadio::new(), ConnectionConfig::default());
        for i in 0..MAX_NETWORKS {
            m.add_network(&format!("net{}", i), "password1", 0).unwrap();
        }

        let err = m.add_network("net10", "password1", 0).unwrap_err();
        assert!(matches!(err, ConnectError::ListFull(ref s) if s == "net10"));
        let err = m.connect("net10", "password1").unwrap_err();
        assert!(matches!(err, ConnectError::ListFull(_)));
        assert!(m.radio().attempts().is_empty());
        assert_eq!(m.saved_networks().len(), MAX_NETWORKS);
        for i in 0..MAX_NETWORKS {
            let ssid = format!("net{}", i);
            assert!(m.saved_networks().iter().any(|c| c.ssid == ssid));
        }

        // Existing entries can still be updated.
        m.add_network("net3", "changed12", 7).unwrap();
        assert_eq!(m.saved_networks().len(), MAX_NETWORKS);
        assert_eq!(m.saved_networks()[0].ssid, "net3");

        m.load_networks();
        assert_eq!(m.saved_networks().len(), MAX_NETWORKS);
        assert_eq!(m.saved_networks()[0].ssid, "net3");
    }

    #[test]
    fn test_failed_persist_keeps_memory_update() {
        let mut radio = SimRadio::new();
        radio.add_network("Home", "password1", -48);
        let mut m = manager(radio, ConnectionConfig::default());
        let region = m.config_mut().store_mut().region_mut();
        region.set_fail_writes(true);
        let writes = region.write_count();

        m.connect("Home", "password1").unwrap();
        m.tick();

        assert_eq!(m.state(), ConnectionState::Connected);
        let home = &m.saved_networks()[0];
        assert_eq!(home.ssid, "Home");
        assert_eq!(home.priority, CONNECT_PRIORITY);
        assert_eq!(home.last_signal, -48);
        assert!(home.last_connected > 0);
        assert_eq!(m.config().store().region().write_count(), writes);

        let mut reopened = FlatStore::new(m.config().store().region().clone());
        reopened.begin(crate::storage::DEFAULT_NAMESPACE).unwrap();
        assert!(reopened.get_string(crate::config::KEY_CONFIG_DATA).is_none());
    }

    #[test]
    fn test_remove_network() {
        let mut m = manager(SimRadio::new(), ConnectionConfig::default());
        m.add_network("A", "password1", 0).unwrap();
        assert!(m.remove_network("A").unwrap());
        assert!(!m.remove_network("A").unwrap());
        m.load_networks();
        assert!(m.saved_networks().is_empty());
    }

    #[test]
    fn test_networks_persist_encrypted() {
        let mut m = manager(SimRadio::new(), ConnectionConfig::default());
        m.add_network("Office", "corp-secret", 3).unwrap();

        let raw = m.config().get(KEY_SAVED_NETWORKS).unwrap();
        assert!(!raw.contains("corp-secret"));

        m.load_networks();
        assert_eq!(m.saved_networks()[0].secret, "corp-secret");
        assert_eq!(m.saved_networks()[0].priority, 3);
    }

    #[test]
    fn test_connect_to_best_without_match() {
        let mut radio = SimRadio::new();
        radio.add_network("Stranger", "", -30);
        let mut m = manager(radio, ConnectionConfig::default());
        m.add_network("Home", "password1", 0).unwrap();
        assert!(!m.connect_to_best());
        assert!(m.radio().attempts().is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_tie_broken_by_priority() {
        let mut radio = SimRadio::new();
        radio.add_network("low", "password1", -60);
        radio.add_network("high", "password1", -60);
        let mut m = manager(radio, ConnectionConfig::default());
        m.add_network("low", "password1", 1).unwrap();
        m.add_network("high", "password1", 5).unwrap();
        assert!(m.connect_to_best());
        assert_eq!(m.radio().attempts(), ["high".to_string()]);
    }
}
