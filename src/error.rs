//! Crate-level error taxonomy.
//!
//! Module errors ([`StoreError`], [`ConfigError`], [`ConnectError`],
//! [`RadioError`], [`CipherError`]) convert into [`Error`], whose
//! [`kind`](Error::kind) gives the coarse category an application reports.

use crate::config::ConfigError;
use crate::crypto::CipherError;
use crate::storage::StoreError;
use crate::wifi::{ConnectError, RadioError};
use std::fmt;

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoCredentials,
    ConnectFailed,
    ConfigInvalid,
    StorageFailed,
    Timeout,
    AuthFailed,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoCredentials => "no credentials",
            Self::ConnectFailed => "connect failed",
            Self::ConfigInvalid => "config invalid",
            Self::StorageFailed => "storage failed",
            Self::Timeout => "timeout",
            Self::AuthFailed => "authentication failed",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the device facade.
#[derive(Debug)]
pub enum Error {
    /// No network credentials are configured.
    NoCredentials,
    /// Joining a network failed.
    ConnectFailed(ConnectError),
    /// Configuration rejected.
    ConfigInvalid(ConfigError),
    /// Persistent store failed.
    StorageFailed(StoreError),
    /// An operation did not finish in time.
    Timeout,
    /// A secret could not be verified or decrypted.
    AuthFailed(CipherError),
    /// Anything else.
    Unknown(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoCredentials => ErrorKind::NoCredentials,
            Self::ConnectFailed(_) => ErrorKind::ConnectFailed,
            Self::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            Self::StorageFailed(_) => ErrorKind::StorageFailed,
            Self::Timeout => ErrorKind::Timeout,
            Self::AuthFailed(_) => ErrorKind::AuthFailed,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no credentials configured"),
            Self::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            Self::ConfigInvalid(e) => write!(f, "{}", e),
            Self::StorageFailed(e) => write!(f, "{}", e),
            Self::Timeout => write!(f, "timed out"),
            Self::AuthFailed(e) => write!(f, "authentication failed: {}", e),
            Self::Unknown(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectFailed(e) => Some(e),
            Self::ConfigInvalid(e) => Some(e),
            Self::StorageFailed(e) => Some(e),
            Self::AuthFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::StorageFailed(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Storage(e) => Self::StorageFailed(e),
            ConfigError::Cipher(e) => Self::AuthFailed(e),
            other => Self::ConfigInvalid(other),
        }
    }
}

impl From<ConnectError> for Error {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::Config(e) => e.into(),
            other => Self::ConnectFailed(other),
        }
    }
}

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Self::ConnectFailed(ConnectError::Radio(e))
    }
}

impl From<CipherError> for Error {
    fn from(e: CipherError) -> Self {
        Self::AuthFailed(e)
    }
}
