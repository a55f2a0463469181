//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts via `#[from]`.
//! The types here are `Clone` so they can travel on the session event
//! stream alongside readings.

use std::fmt;

use uuid::Uuid;

use crate::gatt::GattStatus;
use crate::id::PeripheralAddress;
use crate::profile::SensorKind;

/// Top-level error for a negotiation session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Discovery or connect cannot proceed (radio off, adapter missing, …).
    #[error("transport unavailable")]
    TransportUnavailable(#[from] TransportError),

    /// The peripheral answered service discovery with a non-success status.
    #[error("service discovery failed with status {status}")]
    ServiceDiscoveryFailed {
        /// Status reported by the peripheral.
        status: GattStatus,
    },

    /// The link dropped outside of an intentional close.
    #[error("connection lost unexpectedly")]
    UnexpectedDisconnect,

    /// A notification payload was too short to decode.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),

    /// A required service, characteristic or descriptor is missing.
    #[error("required GATT attribute {uuid} not found")]
    AttributeNotFound {
        /// UUID of the missing attribute.
        uuid: Uuid,
    },

    /// A configuration write completed with a non-success status.
    #[error("{step} rejected with status {status}")]
    WriteRejected {
        /// Which configuration write failed.
        step: WriteStep,
        /// Status reported by the peripheral.
        status: GattStatus,
    },

    /// A session is already live; only one is supported at a time.
    #[error("a session is already active")]
    SessionActive,
}

/// Failure of the underlying radio/transport stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No adapter is present or it is powered off.
    #[error("no BLE adapter available")]
    AdapterUnavailable,

    /// The selected peripheral is no longer known to the adapter.
    #[error("peripheral {0} not found")]
    PeripheralNotFound(PeripheralAddress),

    /// The transport worker has shut down and accepts no more commands.
    #[error("transport command channel closed")]
    ChannelClosed,

    /// The backend returned an error for an operation.
    #[error("{operation} failed: {reason}")]
    Backend {
        /// Operation that failed (e.g. `"connect"`).
        operation: &'static str,
        /// Backend error message.
        reason: String,
    },
}

/// Details about why a notification payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// The buffer is shorter than the subsystem's encoding.
    #[error("{sensor} payload must be at least {expected} bytes, got {actual}")]
    TooShort {
        /// Subsystem the payload belongs to.
        sensor: SensorKind,
        /// Minimum byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },
}

/// A configuration write issued during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStep {
    /// Enable-notification write to a data characteristic's CCCD.
    NotifyDescriptor(SensorKind),
    /// Sensor-on write to a configuration characteristic.
    SensorEnable(SensorKind),
}

impl fmt::Display for WriteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotifyDescriptor(kind) => write!(f, "{kind} notification descriptor write"),
            Self::SensorEnable(kind) => write!(f, "{kind} sensor enable write"),
        }
    }
}
