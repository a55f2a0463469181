//! Session state: the single live negotiation record.

use std::fmt;

use sensortag_domain::gatt::GattTable;
use sensortag_domain::id::SessionId;
use sensortag_domain::peripheral::PeripheralHandle;

/// Negotiation progress, in strict forward order.
///
/// The derived ordering follows declaration order, so `a < b` means `a`
/// comes earlier in the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NegotiationState {
    /// No session.
    Idle,
    /// Connect issued, waiting for the link.
    Connecting,
    /// Service discovery issued.
    ServiceDiscovery,
    /// Illuminance CCCD write issued.
    ConfiguringIlluminanceNotify,
    /// Temperature CCCD write issued.
    ConfiguringTemperatureNotify,
    /// Illuminance sensor-on write issued.
    EnablingIlluminanceSensor,
    /// Temperature sensor-on write issued.
    EnablingTemperatureSensor,
    /// Fully configured; decoding notifications.
    Streaming,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::ServiceDiscovery => "service-discovery",
            Self::ConfiguringIlluminanceNotify => "configuring-illuminance-notify",
            Self::ConfiguringTemperatureNotify => "configuring-temperature-notify",
            Self::EnablingIlluminanceSensor => "enabling-illuminance-sensor",
            Self::EnablingTemperatureSensor => "enabling-temperature-sensor",
            Self::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Transport link status as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// The active session. At most one exists, owned by the
/// [`Negotiator`](crate::negotiation::Negotiator).
#[derive(Debug, Clone)]
pub struct SessionState {
    id: SessionId,
    peripheral: PeripheralHandle,
    pub(crate) link: LinkStatus,
    pub(crate) state: NegotiationState,
    pub(crate) table: GattTable,
    pub(crate) stalled: bool,
}

impl SessionState {
    pub(crate) fn connecting(id: SessionId, peripheral: PeripheralHandle) -> Self {
        Self {
            id,
            peripheral,
            link: LinkStatus::Connecting,
            state: NegotiationState::Connecting,
            table: GattTable::default(),
            stalled: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn peripheral(&self) -> &PeripheralHandle {
        &self.peripheral
    }

    #[must_use]
    pub fn link(&self) -> LinkStatus {
        self.link
    }

    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Services discovered for this session (empty before discovery).
    #[must_use]
    pub fn table(&self) -> &GattTable {
        &self.table
    }

    /// Whether service discovery failed and the session stopped progressing.
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Both notification descriptors have been written.
    #[must_use]
    pub fn notifications_configured(&self) -> bool {
        self.state >= NegotiationState::EnablingIlluminanceSensor
    }

    /// Both sensor-enable writes have completed.
    #[must_use]
    pub fn sensors_enabled(&self) -> bool {
        self.state == NegotiationState::Streaming
    }
}
