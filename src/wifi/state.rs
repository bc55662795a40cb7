//! Connection states and the events reported to subscribers.

use std::fmt;

/// State of the station connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection gave up; the provisioning portal should take over.
    PortalFallback,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::PortalFallback => "portal-fallback",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Notification delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { ssid: String },
    /// An established link was lost.
    Disconnected,
    /// Reconnect attempt `n` (1-based) is starting.
    ReconnectAttempt(u8),
    /// Attempts exhausted.
    PortalFallback,
}
