//! Event bus port: deliver session events to consumers.

use sensortag_domain::error::SessionError;
use sensortag_domain::peripheral::PeripheralHandle;
use sensortag_domain::reading::SensorReading;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The consumer asked to close the session.
    Requested,
    /// The connection attempt failed or was refused.
    ConnectFailed,
    /// The link dropped while connected.
    ConnectionLost,
    /// The session was torn down after a fatal negotiation error.
    Aborted,
}

/// Everything a consumer can observe from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A scan saw a peripheral for the first time.
    PeripheralDiscovered(PeripheralHandle),
    /// The discovery window closed.
    ScanStopped,
    /// The link to the peripheral is up.
    Connected(PeripheralHandle),
    /// Both sensors are enabled and notifications are flowing.
    Streaming,
    /// A decoded notification.
    Reading(SensorReading),
    /// A session-level error surfaced to the consumer.
    Failed(SessionError),
    /// The session is gone and the client is idle again.
    Disconnected { reason: DisconnectReason },
}

/// Publishes session events to interested subscribers.
///
/// Called synchronously from the state machine; implementations must not
/// block and must not assume a particular thread.
pub trait SessionEventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: SessionEvent);
}

impl<T: SessionEventPublisher + ?Sized> SessionEventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: SessionEvent) {
        (**self).publish(event);
    }
}
