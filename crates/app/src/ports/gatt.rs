//! GATT session port: the asynchronous request/event transport.
//!
//! Commands are fire-and-forget: issuing one only queues it. Its outcome
//! comes back later as a [`TransportEvent`] tagged with the same
//! [`SessionId`]. Completions are untagged beyond that ("a descriptor write
//! finished"), so the caller must know which request is outstanding.

use uuid::Uuid;

use sensortag_domain::error::TransportError;
use sensortag_domain::gatt::{GattStatus, GattTable};
use sensortag_domain::id::SessionId;
use sensortag_domain::peripheral::PeripheralHandle;

/// Outbound GATT commands.
///
/// Implementations must not block. Returning `Err` means the command could
/// not even be queued; failures of the operation itself are reported through
/// the matching completion event.
pub trait GattSession {
    /// Open a connection to `peripheral`. Completes with
    /// [`TransportEventKind::Connected`] or [`TransportEventKind::Disconnected`].
    fn connect(
        &mut self,
        session: SessionId,
        peripheral: &PeripheralHandle,
    ) -> Result<(), TransportError>;

    /// Discover services. Completes with [`TransportEventKind::ServicesDiscovered`].
    fn discover_services(&mut self, session: SessionId) -> Result<(), TransportError>;

    /// Route value-changed events for `characteristic` to this client.
    /// Has no completion event.
    fn enable_local_notifications(
        &mut self,
        session: SessionId,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;

    /// Write `value` to a descriptor of `characteristic`. Completes with
    /// [`TransportEventKind::DescriptorWritten`].
    fn write_descriptor(
        &mut self,
        session: SessionId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Write `value` to `characteristic` (with response). Completes with
    /// [`TransportEventKind::CharacteristicWritten`].
    fn write_characteristic(
        &mut self,
        session: SessionId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Release the session's connection. Events still in flight for this
    /// session may arrive afterwards.
    fn close(&mut self, session: SessionId);
}

/// An event delivered by the transport for a given session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub session: SessionId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    #[must_use]
    pub fn new(session: SessionId, kind: TransportEventKind) -> Self {
        Self { session, kind }
    }
}

/// What happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// The link is up.
    Connected,
    /// The link is down, or a connection attempt failed.
    Disconnected,
    /// Service discovery finished. `table` is empty unless `status` is success.
    ServicesDiscovered { status: GattStatus, table: GattTable },
    /// A descriptor write finished.
    DescriptorWritten { status: GattStatus },
    /// A characteristic write finished.
    CharacteristicWritten { status: GattStatus },
    /// Unsolicited notification.
    ValueChanged { characteristic: Uuid, value: Vec<u8> },
}
