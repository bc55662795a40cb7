//! IonConnect ESP32 firmware binary.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use ionconnect_esp32::storage::NvsStore;
    use ionconnect_esp32::wifi::{ConnectionEvent, EspRadio};
    use ionconnect_esp32::{BeginOutcome, DeviceIdentity, Provisioner, ProvisionerConfig};
    use log::{error, info, warn};
    use std::time::Duration;

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("=== IonConnect ESP32 starting ===");

    let setup = || -> Result<_, Box<dyn std::error::Error>> {
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let identity = DeviceIdentity::read()?;
        info!("Device identity: {:?}", identity);

        let radio = EspRadio::new(peripherals.modem, sysloop, Some(nvs.clone()))?;
        let store = NvsStore::new(nvs);
        Ok(Provisioner::new(store, radio, identity, ProvisionerConfig::default())?)
    };

    let mut device = match setup() {
        Ok(device) => device,
        Err(e) => {
            error!("Startup failed: {}", e);
            loop {
                std::thread::sleep(Duration::from_secs(10));
            }
        }
    };

    device.manager_mut().subscribe(|event| match event {
        ConnectionEvent::Connected { ssid } => info!("Online via {}", ssid),
        ConnectionEvent::Disconnected => warn!("Offline"),
        ConnectionEvent::ReconnectAttempt(n) => info!("Reconnect attempt {}", n),
        ConnectionEvent::PortalFallback => warn!("Falling back to provisioning portal"),
    });

    match device.begin() {
        Ok(BeginOutcome::PortalRequired) => {
            info!("Waiting for provisioning on {}", device.portal_ssid())
        }
        Ok(outcome) => info!("Boot outcome: {:?}", outcome),
        Err(e) => error!("Begin failed ({}): {}", e.kind(), e),
    }

    info!("Entering main loop...");
    loop {
        device.handle();
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-sim' to exercise the core on the host.");
}
