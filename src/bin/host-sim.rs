//! Host simulator for the provisioning core.
//!
//! Runs the full boot flow against a simulated radio and the host store
//! (`~/.ionconnect-esp32/`), then scripts a link loss, a failed reconnect
//! episode and the portal fallback. Time is simulated, so the run finishes
//! in well under a second.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug cargo run --bin host-sim
//! cargo run --bin host-sim -- --fresh     # start from an empty store
//! ```

use ionconnect_esp32::storage::{self, Store};
use ionconnect_esp32::wifi::{ConnectionEvent, ConnectionState, SimRadio};
use ionconnect_esp32::{BeginOutcome, DeviceIdentity, Provisioner, ProvisionerConfig};
use log::{error, info};
use std::time::{Duration, Instant};

const HOME_SSID: &str = "HomeNetwork";
const HOME_PASS: &str = "correct-horse";
const CAFE_SSID: &str = "CafeGuest";
const CAFE_PASS: &str = "espresso42";

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== IonConnect host simulator starting ===");

    let fresh = std::env::args().any(|a| a == "--fresh");
    if let Err(e) = run(fresh) {
        error!("Simulation failed ({}): {}", e.kind(), e);
        std::process::exit(1);
    }
}

fn run(fresh: bool) -> Result<(), ionconnect_esp32::Error> {
    let mut store = storage::open_default()?;
    if fresh {
        store.begin(storage::DEFAULT_NAMESPACE)?;
        store.clear()?;
        store.end();
        info!("Store cleared");
    }

    let mut radio = SimRadio::new();
    radio.add_network(HOME_SSID, HOME_PASS, -58);
    radio.add_network(CAFE_SSID, CAFE_PASS, -71);
    radio.add_network("Neighbour", "unknown-secret", -40);

    let mut device = Provisioner::new(
        store,
        radio,
        DeviceIdentity::host(),
        ProvisionerConfig::default(),
    )?;
    device.manager_mut().subscribe(|event| info!("event: {:?}", event));
    device.manager_mut().subscribe(|event| {
        if *event == ConnectionEvent::PortalFallback {
            info!("(a real device would now open its access point)");
        }
    });

    let mut now = Instant::now();

    if device.begin()? == BeginOutcome::PortalRequired {
        info!("Portal open on {}; submitting credentials", device.portal_ssid());
        let config = device.config_mut();
        config.set("wifi_ssid", HOME_SSID)?;
        config.set("wifi_pass", HOME_PASS)?;
        config.set("device_name", "Simulated Device")?;
        config.validate()?;
        config.save()?;
        device.stop_portal();
        device.connect()?;
    }
    device.manager_mut().add_network(CAFE_SSID, CAFE_PASS, 0)?;

    step(&mut device, &mut now, Duration::from_millis(100));
    let token = device.access_token()?;
    info!(
        "State {} on {:?}, {} saved networks, token {}...",
        device.state(),
        device.manager().current_ssid(),
        device.manager().saved_networks().len(),
        &token[..6]
    );

    info!("--- Home network goes away ---");
    device.manager_mut().radio_mut().remove_network(HOME_SSID);
    device.manager_mut().start_scan()?;
    run_until(&mut device, &mut now, |s| s == ConnectionState::Connected)?;
    info!("Roamed to {:?}", device.manager().current_ssid());

    info!("--- Every access point goes silent ---");
    device.manager_mut().radio_mut().set_block_joins(true);
    device.manager_mut().radio_mut().remove_network(CAFE_SSID);
    run_until(&mut device, &mut now, |s| s == ConnectionState::PortalFallback)?;
    info!(
        "Gave up after {} attempts, portal active: {}",
        device.manager().reconnect_attempts() - 1,
        device.portal_active()
    );

    info!("Backup: {}", device.config().export_json());
    info!("=== Simulation complete ===");
    Ok(())
}

fn step<R, S>(device: &mut Provisioner<R, S>, now: &mut Instant, by: Duration)
where
    R: ionconnect_esp32::Radio,
    S: Store,
{
    *now += by;
    device.handle_at(*now);
}

/// Tick in 500 ms steps of simulated time until `done` holds (max 10 min).
fn run_until<R, S>(
    device: &mut Provisioner<R, S>,
    now: &mut Instant,
    done: impl Fn(ConnectionState) -> bool,
) -> Result<(), ionconnect_esp32::Error>
where
    R: ionconnect_esp32::Radio,
    S: Store,
{
    for _ in 0..1200 {
        step(device, now, Duration::from_millis(500));
        if done(device.state()) {
            return Ok(());
        }
    }
    Err(ionconnect_esp32::Error::Timeout)
}
