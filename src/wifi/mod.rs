//! Station connection management.
//!
//! # Components
//!
//! - [`ConnectionManager`] - state machine with backoff and portal fallback
//! - [`Radio`] - what the manager needs from a station radio
//! - [`SimRadio`] - scripted radio for tests and the host simulator
//! - `EspRadio` - ESP-IDF driver adapter (ESP32 only)
//!
//! Link status reaches the manager through a [`LinkEvent`] channel; nothing
//! here keeps global state.

mod backoff;
mod credential;
#[cfg(feature = "esp32")]
mod esp_radio;
mod machine;
mod radio;
mod state;

pub use backoff::Backoff;
pub use credential::{
    validate_ssid, Credential, EncryptionKind, ScanResult, CONNECT_PRIORITY, MAX_NETWORKS,
    MAX_SSID_LEN,
};
#[cfg(feature = "esp32")]
pub use esp_radio::EspRadio;
pub use machine::{ConnectError, ConnectionConfig, ConnectionManager, KEY_SAVED_NETWORKS};
pub use radio::{
    link_channel, LinkEvent, LinkEventReceiver, LinkEventSender, Radio, RadioError, SimNetwork,
    SimRadio,
};
pub use state::{ConnectionEvent, ConnectionState};
