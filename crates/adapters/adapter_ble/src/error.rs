//! BLE adapter error types.

use std::time::Duration;

use uuid::Uuid;

use sensortag_domain::error::{SessionError, TransportError};
use sensortag_domain::id::PeripheralAddress;

/// Errors specific to the BLE adapter.
#[derive(Debug, thiserror::Error)]
pub enum BleError {
    /// No BLE adapter found on the host.
    #[error("no BLE adapter available")]
    NotAvailable,

    /// A btleplug adapter or peripheral operation failed.
    #[error("BLE operation failed")]
    Btle(#[from] btleplug::Error),

    /// The peripheral is not (or no longer) known to the adapter.
    #[error("peripheral {0} not found")]
    PeripheralNotFound(PeripheralAddress),

    /// A characteristic is missing from the discovered services.
    #[error("characteristic {uuid} not found")]
    CharacteristicNotFound {
        /// UUID that was looked up.
        uuid: Uuid,
    },

    /// The connection did not come up in time.
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A session-level error raised by the application layer.
    #[error("session error")]
    Session(#[from] SessionError),
}

impl BleError {
    /// Convert into a [`TransportError`] for reporting across the port
    /// boundary. `operation` names what was being attempted.
    #[must_use]
    pub fn into_transport(self, operation: &'static str) -> TransportError {
        match self {
            Self::NotAvailable => TransportError::AdapterUnavailable,
            Self::PeripheralNotFound(address) => TransportError::PeripheralNotFound(address),
            Self::Session(SessionError::TransportUnavailable(err)) => err,
            Self::Btle(err) => TransportError::Backend {
                operation,
                reason: err.to_string(),
            },
            other => TransportError::Backend {
                operation,
                reason: other.to_string(),
            },
        }
    }
}

impl From<BleError> for SessionError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::Session(err) => err,
            other => SessionError::TransportUnavailable(other.into_transport("ble")),
        }
    }
}
