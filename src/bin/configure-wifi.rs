//! WiFi configuration utility for ESP32.
//!
//! Stores WiFi credentials through the configuration engine, exactly as the
//! provisioning portal would, so the firmware joins the network on next boot.
//!
//! Usage:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo configure-wifi
//!
//! For open networks (no password):
//!   WIFI_SSID="OpenNetwork" WIFI_PASSWORD="" cargo configure-wifi

/// WiFi SSID - set via WIFI_SSID environment variable at compile time.
#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// WiFi password - set via WIFI_PASSWORD environment variable at compile time.
/// Empty string for open networks.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

/// Print error message and exit after giving the serial monitor time to
/// show it.
#[cfg(feature = "esp32")]
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

#[cfg(feature = "esp32")]
fn main() {
    use ionconnect_esp32::config::{ConfigEngine, EngineOptions, DEFAULT_SCHEMA};
    use ionconnect_esp32::crypto::{DeviceCipher, DeviceIdentity};
    use ionconnect_esp32::storage::NvsStore;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== WiFi Configuration Utility ===\n");

    let ssid = match WIFI_SSID {
        Some(s) if !s.is_empty() => s,
        _ => halt_with_error(
            "Error: WIFI_SSID environment variable not set at compile time.\n\n\
             Usage:\n  \
             WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo configure-wifi",
        ),
    };
    let password = WIFI_PASSWORD.unwrap_or("");

    println!("SSID: {}", ssid);
    println!(
        "Password: {} ({} chars)",
        if password.is_empty() { "(none)" } else { "****" },
        password.chars().count()
    );

    let identity = DeviceIdentity::read()
        .unwrap_or_else(|e| halt_with_error(&format!("Error reading device identity: {:?}", e)));
    let store =
        NvsStore::take().unwrap_or_else(|e| halt_with_error(&format!("Error opening NVS: {}", e)));

    let cipher = DeviceCipher::new(&identity);
    let mut engine = ConfigEngine::new(store, cipher, EngineOptions::default())
        .unwrap_or_else(|e| halt_with_error(&format!("Error: {}", e)));
    if let Err(e) = engine.begin() {
        halt_with_error(&format!("Error loading config: {}", e));
    }
    if let Err(e) = engine.load_schema(DEFAULT_SCHEMA) {
        halt_with_error(&format!("Error loading schema: {}", e));
    }

    for (key, value) in [("wifi_ssid", ssid), ("wifi_pass", password)] {
        if let Err(e) = engine.set(key, value) {
            halt_with_error(&format!("Error: {}", e));
        }
    }

    match engine.save() {
        Ok(()) => {
            println!("\n=== WiFi configuration saved ===");
            println!("Credentials persist across reboots.");
        }
        Err(e) => halt_with_error(&format!("Error saving config: {}", e)),
    }

    println!("\n=== Done - you can disconnect the device ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    eprintln!("This binary must be built for ESP32.");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo configure-wifi");
    std::process::exit(1);
}
