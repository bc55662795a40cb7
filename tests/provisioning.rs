//! End-to-end behaviour of the provisioning core through the public API,
//! using the simulated radio and in-memory flash regions.

use ionconnect_esp32::config::{
    ConfigEngine, ConfigError, EngineOptions, DEFAULT_SCHEMA, KEY_CONFIG_DATA,
};
use ionconnect_esp32::crypto::{DeviceCipher, DeviceIdentity};
use ionconnect_esp32::storage::{FlatStore, MemoryRegion, Store, StoreError};
use ionconnect_esp32::wifi::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, LinkEvent, SimRadio,
};
use ionconnect_esp32::{BeginOutcome, Provisioner, ProvisionerConfig};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

const IDENTITY: DeviceIdentity =
    DeviceIdentity::new([0x24, 0x6f, 0x28, 0x11, 0x22, 0x33], 0x0BAD_F00D);

type Manager = ConnectionManager<SimRadio, FlatStore<MemoryRegion>>;

fn engine_on(region: MemoryRegion) -> ConfigEngine<FlatStore<MemoryRegion>> {
    let mut engine = ConfigEngine::new(
        FlatStore::new(region),
        DeviceCipher::new(&IDENTITY),
        EngineOptions::default(),
    )
    .unwrap();
    engine.begin().unwrap();
    engine
}

fn manager(radio: SimRadio, settings: ConnectionConfig) -> Manager {
    let engine = engine_on(MemoryRegion::new(4096));
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

/// Small deterministic generator for table-style property checks.
struct Lcg(u32);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.0 >> 16
    }
}

#[test]
fn test_best_network_always_in_latest_scan() {
    let mut rng = Lcg(7);
    let pool = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"];

    for _ in 0..50 {
        let mut radio = SimRadio::new();
        let mut scanned = Vec::new();
        for ssid in pool {
            if rng.next() % 2 == 0 {
                radio.add_network(ssid, "password1", -30 - (rng.next() % 60) as i8);
                scanned.push(ssid);
            }
        }

        let mut m = manager(radio, ConnectionConfig::default());
        let mut known = Vec::new();
        for ssid in pool {
            if rng.next() % 2 == 0 {
                m.add_network(ssid, "password1", (rng.next() % 5) as i8).unwrap();
                known.push(ssid);
            }
        }

        let picked = m.connect_to_best();
        let attempts = m.radio().attempts();
        let reachable = scanned.iter().any(|s| known.contains(s));
        assert_eq!(picked, reachable);
        if picked {
            let chosen = attempts[0].as_str();
            assert!(scanned.contains(&chosen));
            assert!(known.contains(&chosen));
        } else {
            assert!(attempts.is_empty());
        }
    }
}

#[test]
fn test_strongest_scanned_signal_wins() {
    let mut radio = SimRadio::new();
    radio.add_network("A", "password1", -65);
    radio.add_network("B", "password1", -50);
    let mut m = manager(radio, ConnectionConfig::default());
    m.add_network("A", "password1", 0).unwrap();
    m.add_network("B", "password1", 0).unwrap();

    assert!(m.connect_to_best());
    assert_eq!(m.radio().attempts(), ["B".to_string()]);
    let b = m.saved_networks().iter().find(|c| c.ssid == "B").unwrap();
    assert_eq!(b.last_signal, -50);
    assert_eq!(m.radio().scans_started(), 1);

    // Selection keeps using the completed scan until a new one finishes.
    m.radio_mut().set_signal("A", -40);
    assert!(m.connect_to_best());
    assert_eq!(m.radio().attempts().last().map(String::as_str), Some("B"));
    assert_eq!(m.radio().scans_started(), 1);

    assert!(m.start_scan().unwrap());
    m.tick();
    assert!(m.connect_to_best());
    assert_eq!(m.radio().attempts().last().map(String::as_str), Some("A"));
    assert_eq!(m.radio().scans_started(), 2);
}

#[test]
fn test_backoff_doubles_then_resets() {
    let mut radio = SimRadio::new();
    radio.add_network("Home", "password1", -60);
    radio.set_block_joins(true);
    let settings = ConnectionConfig {
        max_reconnect_attempts: 9,
        ..Default::default()
    };
    let mut m = manager(radio, settings);

    m.connect("Home", "password1").unwrap();
    let mut now = Instant::now();
    let mut delays = Vec::new();
    let mut seen_attempts = 0;
    while seen_attempts < 8 {
        now += Duration::from_millis(500);
        m.tick_at(now);
        if m.reconnect_attempts() != seen_attempts {
            seen_attempts = m.reconnect_attempts();
            delays.push(m.backoff_delay().as_secs());
        }
    }
    assert_eq!(delays, [2, 4, 8, 16, 32, 32, 32, 32]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));

    m.radio_mut().set_block_joins(false);
    while m.state() != ConnectionState::Connected {
        now += Duration::from_millis(500);
        m.tick_at(now);
    }
    assert_eq!(m.backoff_delay(), Duration::from_secs(1));
    assert_eq!(m.reconnect_attempts(), 0);
}

#[test]
fn test_fallback_on_fourth_failure_with_max_three() {
    let mut radio = SimRadio::new();
    radio.add_network("Home", "password1", -60);
    radio.set_block_joins(true);
    let settings = ConnectionConfig {
        max_reconnect_attempts: 3,
        ..Default::default()
    };
    let mut m = manager(radio, settings);
    let events = record(&mut m);

    m.connect("Home", "password1").unwrap();
    let mut now = Instant::now();
    let mut timeouts = 0;
    let mut timeouts_at_fallback = None;
    let mut previous = m.state();
    for _ in 0..400 {
        now += Duration::from_millis(500);
        m.tick_at(now);
        let state = m.state();
        if previous == ConnectionState::Connecting && state == ConnectionState::Reconnecting {
            timeouts += 1;
        }
        if state == ConnectionState::PortalFallback && timeouts_at_fallback.is_none() {
            timeouts_at_fallback = Some(timeouts);
        }
        previous = state;
    }

    // The initial join plus three retries all time out; the fourth
    // failure escalates.
    assert_eq!(timeouts_at_fallback, Some(4));
    assert_eq!(m.state(), ConnectionState::PortalFallback);
    assert_eq!(
        events.borrow().as_slice(),
        [
            ConnectionEvent::ReconnectAttempt(1),
            ConnectionEvent::ReconnectAttempt(2),
            ConnectionEvent::ReconnectAttempt(3),
            ConnectionEvent::PortalFallback,
        ]
    );
    assert_eq!(m.radio().attempts().len(), 4);
}

#[test]
fn test_explicit_connect_leaves_fallback() {
    let mut radio = SimRadio::new();
    radio.add_network("Home", "password1", -60);
    radio.set_block_joins(true);
    let settings = ConnectionConfig {
        max_reconnect_attempts: 1,
        ..Default::default()
    };
    let mut m = manager(radio, settings);
    m.connect("Home", "password1").unwrap();
    let mut now = Instant::now();
    while m.state() != ConnectionState::PortalFallback {
        now += Duration::from_secs(1);
        m.tick_at(now);
    }

    m.radio_mut().set_block_joins(false);
    m.connect("Home", "password1").unwrap();
    assert_eq!(m.reconnect_attempts(), 0);
    m.tick();
    assert_eq!(m.state(), ConnectionState::Connected);
}

#[test]
fn test_platform_link_events() {
    let mut radio = SimRadio::new();
    radio.set_block_joins(true);
    let mut m = manager(radio, ConnectionConfig::default());
    let events = record(&mut m);
    let link = m.link_sender();

    m.connect("Office", "password1").unwrap();
    link.send(LinkEvent::Up {
        ssid: "Office".into(),
        rssi: -61,
    })
    .unwrap();
    m.tick();
    assert!(m.is_connected());

    link.send(LinkEvent::Down).unwrap();
    m.tick();
    assert_ne!(m.state(), ConnectionState::Connected);
    assert_eq!(
        events.borrow()[..2],
        [
            ConnectionEvent::Connected {
                ssid: "Office".into()
            },
            ConnectionEvent::Disconnected,
        ]
    );
}

#[test]
fn test_export_clear_import_round_trip() {
    let mut engine = engine_on(MemoryRegion::new(4096));
    engine.load_schema(DEFAULT_SCHEMA).unwrap();
    engine.set("wifi_ssid", "HomeNet").unwrap();
    engine.set("wifi_pass", "longenough1").unwrap();
    engine.set("device_name", "Kitchen Sensor").unwrap();
    engine.set("mqtt_host", "broker.local").unwrap();

    let before: Vec<(String, Option<String>)> = engine
        .keys()
        .map(|k| (k.to_string(), engine.get(k)))
        .collect();
    let backup = engine.export_json();

    engine.clear().unwrap();
    assert_eq!(engine.keys().count(), 0);
    engine.import_json(&backup).unwrap();

    let after: Vec<(String, Option<String>)> = engine
        .keys()
        .map(|k| (k.to_string(), engine.get(k)))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_import_without_config_is_rejected() {
    let mut engine = engine_on(MemoryRegion::new(4096));
    engine.set("device_name", "Kitchen").unwrap();
    let err = engine
        .import_json(r#"{"version":"1.0","timestamp":0}"#)
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBackup(_)));
    assert_eq!(engine.get("device_name").as_deref(), Some("Kitchen"));
}

#[test]
fn test_flat_store_round_trip_and_overflow() {
    let mut store = FlatStore::new(MemoryRegion::new(256));
    store.begin("ionconnect").unwrap();
    store.put_string("name", "sensor-7").unwrap();
    store.put_int("offset", -12).unwrap();
    store.put_uint("boots", 42).unwrap();
    store.put_bool("enabled", true).unwrap();
    store.commit().unwrap();
    let committed = store.region().as_bytes().to_vec();

    let mut reopened = FlatStore::new(store.region().clone());
    reopened.begin("ionconnect").unwrap();
    assert_eq!(reopened.get_string("name").as_deref(), Some("sensor-7"));
    assert_eq!(reopened.get_int("offset"), Some(-12));
    assert_eq!(reopened.get_uint("boots"), Some(42));
    assert_eq!(reopened.get_bool("enabled"), Some(true));
    assert_eq!(reopened.get_uint("offset"), None);

    store.put_string("blob", &"x".repeat(300)).unwrap();
    assert!(matches!(
        store.commit(),
        Err(StoreError::CapacityExceeded { .. })
    ));
    assert_eq!(store.region().as_bytes(), committed.as_slice());

    let mut after = FlatStore::new(store.region().clone());
    after.begin("ionconnect").unwrap();
    assert!(!after.exists("blob"));
    assert_eq!(after.get_uint("boots"), Some(42));
}

#[test]
fn test_required_empty_never_stored() {
    let mut engine = engine_on(MemoryRegion::new(4096));
    engine.load_schema(DEFAULT_SCHEMA).unwrap();
    assert!(matches!(
        engine.set("wifi_ssid", ""),
        Err(ConfigError::Required(_))
    ));
    engine.set("device_name", "Porch").unwrap();
    engine.save().unwrap();

    let blob = engine.store().get_string(KEY_CONFIG_DATA).unwrap();
    assert!(!blob.contains("wifi_ssid"));
}

#[test]
fn test_wifi_fields_scenario() {
    let mut engine = engine_on(MemoryRegion::new(4096));
    engine.load_schema(DEFAULT_SCHEMA).unwrap();

    engine.set("wifi_ssid", "HomeNet").unwrap();
    assert!(matches!(
        engine.set("wifi_pass", "short"),
        Err(ConfigError::TooShort { .. })
    ));
    engine.set("wifi_pass", "longenough1").unwrap();
    engine.save().unwrap();

    let blob = engine.store().get_string(KEY_CONFIG_DATA).unwrap();
    assert!(blob.contains("enc:"));
    assert!(!blob.contains("longenough1"));

    // Reboot onto the same flash contents.
    let mut rebooted = engine_on(engine.store().region().clone());
    rebooted.load_schema(DEFAULT_SCHEMA).unwrap();
    assert_eq!(rebooted.get("wifi_ssid").as_deref(), Some("HomeNet"));
    assert_eq!(rebooted.get("wifi_pass").as_deref(), Some("longenough1"));
    assert!(rebooted.validate().is_ok());
}

#[test]
fn test_provision_then_reboot_connects() {
    let region = MemoryRegion::new(4096);
    let mut radio = SimRadio::new();
    radio.add_network("HomeNet", "longenough1", -55);

    let mut device = Provisioner::new(
        FlatStore::new(region),
        radio,
        IDENTITY,
        ProvisionerConfig::default(),
    )
    .unwrap();
    assert_eq!(device.begin().unwrap(), BeginOutcome::PortalRequired);
    assert!(device.portal_active());

    device.config_mut().set("wifi_ssid", "HomeNet").unwrap();
    device.config_mut().set("wifi_pass", "longenough1").unwrap();
    device.config_mut().save().unwrap();
    let flash = device.config().store().region().clone();

    let mut radio = SimRadio::new();
    radio.add_network("HomeNet", "longenough1", -55);
    let mut device = Provisioner::new(
        FlatStore::new(flash),
        radio,
        IDENTITY,
        ProvisionerConfig::default(),
    )
    .unwrap();
    assert_eq!(device.begin().unwrap(), BeginOutcome::Connecting);
    device.handle();
    assert!(device.is_connected());
    assert!(!device.portal_active());

    let saved = device.manager().saved_networks();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].ssid, "HomeNet");
    assert_eq!(saved[0].secret, "longenough1");
}

#[test]
fn test_fallback_opens_portal_once() {
    let mut radio = SimRadio::new();
    radio.set_block_joins(true);
    let config = ProvisionerConfig {
        connection: ConnectionConfig {
            max_reconnect_attempts: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut device = Provisioner::new(
        FlatStore::new(MemoryRegion::new(4096)),
        radio,
        IDENTITY,
        config,
    )
    .unwrap();
    device.begin().unwrap();
    device.stop_portal();
    device.config_mut().set("wifi_ssid", "Gone").unwrap();
    device.connect().unwrap();

    let mut now = Instant::now();
    while device.state() != ConnectionState::PortalFallback {
        now += Duration::from_secs(1);
        device.handle_at(now);
    }
    assert!(device.portal_active());

    device.stop_portal();
    for _ in 0..10 {
        now += Duration::from_secs(1);
        device.handle_at(now);
    }
    assert!(!device.portal_active());
}

#[cfg(not(feature = "esp32"))]
#[test]
fn test_host_store_backend() {
    use ionconnect_esp32::storage::HostKvStore;

    let dir = std::env::temp_dir().join(format!("ionconnect-it-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let mut device = Provisioner::new(
        HostKvStore::new(&dir),
        SimRadio::new(),
        IDENTITY,
        ProvisionerConfig::default(),
    )
    .unwrap();
    device.begin().unwrap();
    let token = device.access_token().unwrap();

    let mut device = Provisioner::new(
        HostKvStore::new(&dir),
        SimRadio::new(),
        IDENTITY,
        ProvisionerConfig::default(),
    )
    .unwrap();
    device.begin().unwrap();
    assert_eq!(device.access_token().unwrap(), token);

    let _ = std::fs::remove_dir_all(&dir);
}
