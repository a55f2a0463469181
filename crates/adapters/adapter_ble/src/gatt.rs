//! GATT transport over btleplug.
//!
//! [`ChannelTransport`] is the [`GattSession`] handed to the negotiator: it
//! only enqueues commands. A [`GattWorker`] task drains the queue in order,
//! runs each command against the connected peripheral and reports the
//! outcome as a [`TransportEvent`]. Notifications and link loss are
//! forwarded on the same event channel, so the driver sees one FIFO stream.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{
    BDAddr, Central as _, CentralEvent, CharPropFlags, Characteristic, Peripheral as _, Service,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tokio_stream::{Stream, StreamExt as _};
use uuid::Uuid;

use sensortag_app::ports::{GattSession, TransportEvent, TransportEventKind};
use sensortag_domain::error::TransportError;
use sensortag_domain::gatt::{GattCharacteristic, GattService, GattStatus, GattTable};
use sensortag_domain::id::{PeripheralAddress, SessionId};
use sensortag_domain::peripheral::PeripheralHandle;
use sensortag_domain::profile::{CLIENT_CHARACTERISTIC_CONFIG, ENABLE_NOTIFICATION_VALUE};

use crate::error::BleError;

/// CCCD value that switches notifications and indications off.
const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];
/// CCCD value that enables indications.
const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// A queued GATT command, tagged with the session that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GattCommand {
    Connect {
        session: SessionId,
        address: PeripheralAddress,
    },
    DiscoverServices {
        session: SessionId,
    },
    EnableLocalNotifications {
        session: SessionId,
        characteristic: Uuid,
    },
    WriteDescriptor {
        session: SessionId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    WriteCharacteristic {
        session: SessionId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    Close {
        session: SessionId,
    },
}

impl GattCommand {
    fn session(&self) -> SessionId {
        match self {
            Self::Connect { session, .. }
            | Self::DiscoverServices { session }
            | Self::EnableLocalNotifications { session, .. }
            | Self::WriteDescriptor { session, .. }
            | Self::WriteCharacteristic { session, .. }
            | Self::Close { session } => *session,
        }
    }
}

/// [`GattSession`] that enqueues commands for a [`GattWorker`].
///
/// Never blocks; fails only once the worker has gone away.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    commands: mpsc::UnboundedSender<GattCommand>,
}

impl ChannelTransport {
    pub(crate) fn new(commands: mpsc::UnboundedSender<GattCommand>) -> Self {
        Self { commands }
    }

    fn send(&self, command: GattCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl GattSession for ChannelTransport {
    fn connect(
        &mut self,
        session: SessionId,
        peripheral: &PeripheralHandle,
    ) -> Result<(), TransportError> {
        self.send(GattCommand::Connect {
            session,
            address: peripheral.address(),
        })
    }

    fn discover_services(&mut self, session: SessionId) -> Result<(), TransportError> {
        self.send(GattCommand::DiscoverServices { session })
    }

    fn enable_local_notifications(
        &mut self,
        session: SessionId,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.send(GattCommand::EnableLocalNotifications {
            session,
            characteristic,
        })
    }

    fn write_descriptor(
        &mut self,
        session: SessionId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.send(GattCommand::WriteDescriptor {
            session,
            characteristic,
            descriptor,
            value: value.to_vec(),
        })
    }

    fn write_characteristic(
        &mut self,
        session: SessionId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.send(GattCommand::WriteCharacteristic {
            session,
            characteristic,
            value: value.to_vec(),
        })
    }

    fn close(&mut self, session: SessionId) {
        if self.send(GattCommand::Close { session }).is_err() {
            tracing::debug!(%session, "GATT worker already stopped, nothing to close");
        }
    }
}

/// The connected peripheral of the current session.
struct Link {
    session: SessionId,
    peripheral: Peripheral,
    forwarder: Option<JoinHandle<()>>,
    notifications_failed: bool,
}

/// Executes queued GATT commands against a btleplug central, one at a time.
pub(crate) struct GattWorker {
    central: Adapter,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Option<Link>,
}

impl GattWorker {
    /// Spawn a worker task and return the transport feeding it.
    ///
    /// The task ends once every [`ChannelTransport`] clone is dropped,
    /// disconnecting whatever is still connected.
    pub(crate) fn spawn(
        central: Adapter,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> (ChannelTransport, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let worker = Self {
            central,
            connect_timeout,
            events,
            link: None,
        };
        let handle = tokio::spawn(worker.run(commands_rx));
        (ChannelTransport::new(commands_tx), handle)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<GattCommand>) {
        let mut central_events = match self.central.events().await {
            Ok(stream) => Some(stream),
            Err(err) => {
                tracing::warn!(%err, "cannot watch adapter events, link loss will go unnoticed");
                None
            }
        };

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.execute(command).await,
                    None => break,
                },
                event = next_central_event(&mut central_events) => match event {
                    Some(event) => self.on_central_event(&event),
                    None => central_events = None,
                },
            }
        }

        self.release().await;
        tracing::debug!("GATT worker stopped");
    }

    async fn execute(&mut self, command: GattCommand) {
        let session = command.session();
        match command {
            GattCommand::Connect { address, .. } => self.connect(session, address).await,
            GattCommand::Close { .. } => {
                if self.link.as_ref().is_some_and(|link| link.session == session) {
                    self.release().await;
                }
            }
            command => {
                let Some(link) = self.link.as_mut().filter(|link| link.session == session) else {
                    tracing::debug!(%session, ?command, "skipping command for stale session");
                    return;
                };
                if let Some(kind) = run_command(link, command, &self.events).await {
                    emit(&self.events, session, kind);
                }
            }
        }
    }

    async fn connect(&mut self, session: SessionId, address: PeripheralAddress) {
        self.release().await;

        let outcome = tokio::time::timeout(self.connect_timeout, self.open(address)).await;
        let kind = match settle_connect(outcome, self.connect_timeout) {
            Ok(peripheral) => {
                tracing::info!(%session, %address, "peripheral connected");
                self.link = Some(Link {
                    session,
                    peripheral,
                    forwarder: None,
                    notifications_failed: false,
                });
                TransportEventKind::Connected
            }
            Err(err) => {
                tracing::warn!(%session, %address, %err, "failed to connect peripheral");
                if matches!(err, BleError::ConnectTimeout(_)) {
                    self.abandon(address).await;
                }
                TransportEventKind::Disconnected
            }
        };
        emit(&self.events, session, kind);
    }

    async fn open(&self, address: PeripheralAddress) -> Result<Peripheral, BleError> {
        let peripheral = self.lookup(address).await?;
        peripheral.connect().await?;
        Ok(peripheral)
    }

    async fn lookup(&self, address: PeripheralAddress) -> Result<Peripheral, BleError> {
        let target = BDAddr::from(address.into_inner());
        self.central
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == target)
            .ok_or(BleError::PeripheralNotFound(address))
    }

    /// Disconnect a peripheral whose connect attempt was cut short, in case
    /// the link came up after the attempt was dropped.
    async fn abandon(&self, address: PeripheralAddress) {
        let result = match self.lookup(address).await {
            Ok(peripheral) => peripheral.disconnect().await.map_err(BleError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::debug!(%address, %err, "nothing to disconnect after connect timeout");
        }
    }

    fn on_central_event(&mut self, event: &CentralEvent) {
        let CentralEvent::DeviceDisconnected(id) = event else {
            return;
        };
        let Some(link) = self.link.take_if(|link| link.peripheral.id() == *id) else {
            return;
        };

        tracing::info!(session = %link.session, "peripheral disconnected");
        if let Some(forwarder) = link.forwarder {
            forwarder.abort();
        }
        emit(&self.events, link.session, TransportEventKind::Disconnected);
    }

    /// Drop the current link, disconnecting the peripheral.
    async fn release(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        if let Some(forwarder) = link.forwarder {
            forwarder.abort();
        }
        if let Err(err) = link.peripheral.disconnect().await {
            tracing::warn!(session = %link.session, %err, "failed to disconnect peripheral");
        }
        tracing::debug!(session = %link.session, "link released");
    }
}

async fn next_central_event(events: &mut Option<CentralEvents>) -> Option<CentralEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Run a command on an established link. Returns the completion event, if
/// the command has one.
async fn run_command(
    link: &mut Link,
    command: GattCommand,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<TransportEventKind> {
    let session = link.session;
    let peripheral = &link.peripheral;

    match command {
        GattCommand::DiscoverServices { .. } => Some(match peripheral.discover_services().await {
            Ok(()) => TransportEventKind::ServicesDiscovered {
                status: GattStatus::SUCCESS,
                table: gatt_table(&peripheral.services()),
            },
            Err(err) => {
                tracing::warn!(%session, %err, "service discovery failed");
                TransportEventKind::ServicesDiscovered {
                    status: GattStatus::FAILURE,
                    table: GattTable::default(),
                }
            }
        }),
        GattCommand::EnableLocalNotifications { characteristic, .. } => {
            if link.forwarder.is_none() {
                match peripheral.notifications().await {
                    Ok(stream) => {
                        link.forwarder = Some(tokio::spawn(forward_notifications(
                            session,
                            stream,
                            events.clone(),
                        )));
                    }
                    Err(err) => {
                        tracing::warn!(%session, %characteristic, %err, "cannot open notification stream");
                        link.notifications_failed = true;
                    }
                }
            }
            None
        }
        GattCommand::WriteDescriptor {
            characteristic,
            descriptor,
            value,
            ..
        } => {
            if refuses_subscription(link.notifications_failed, descriptor, &value) {
                tracing::warn!(%session, %characteristic, "notification stream unavailable, refusing CCCD write");
                return Some(TransportEventKind::DescriptorWritten {
                    status: GattStatus::FAILURE,
                });
            }
            let result = write_descriptor(peripheral, characteristic, descriptor, &value).await;
            Some(TransportEventKind::DescriptorWritten {
                status: status_of(session, "descriptor write", result),
            })
        }
        GattCommand::WriteCharacteristic {
            characteristic,
            value,
            ..
        } => {
            let result = write_characteristic(peripheral, characteristic, &value).await;
            Some(TransportEventKind::CharacteristicWritten {
                status: status_of(session, "characteristic write", result),
            })
        }
        GattCommand::Connect { .. } | GattCommand::Close { .. } => None,
    }
}

/// Whether a descriptor write must be answered with a failure because it
/// subscribes to notifications that can no longer be delivered.
fn refuses_subscription(notifications_failed: bool, descriptor: Uuid, value: &[u8]) -> bool {
    notifications_failed
        && descriptor == CLIENT_CHARACTERISTIC_CONFIG
        && cccd_action(value) == CccdAction::Subscribe
}

/// Flatten a connect attempt bounded by `limit`, reporting an elapsed
/// deadline as [`BleError::ConnectTimeout`].
fn settle_connect<T>(
    outcome: Result<Result<T, BleError>, Elapsed>,
    limit: Duration,
) -> Result<T, BleError> {
    outcome.unwrap_or(Err(BleError::ConnectTimeout(limit)))
}

fn status_of(session: SessionId, operation: &str, result: Result<(), BleError>) -> GattStatus {
    match result {
        Ok(()) => GattStatus::SUCCESS,
        Err(err) => {
            tracing::warn!(%session, %err, operation, "GATT operation failed");
            GattStatus::FAILURE
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<TransportEvent>, session: SessionId, kind: TransportEventKind) {
    if events.send(TransportEvent::new(session, kind)).is_err() {
        tracing::trace!(%session, "session driver gone, dropping transport event");
    }
}

async fn forward_notifications(
    session: SessionId,
    mut notifications: Notifications,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(notification) = notifications.next().await {
        let kind = TransportEventKind::ValueChanged {
            characteristic: notification.uuid,
            value: notification.value,
        };
        if events.send(TransportEvent::new(session, kind)).is_err() {
            break;
        }
    }
    tracing::debug!(%session, "notification stream ended");
}

/// Find a GATT characteristic by UUID on a peripheral that has already
/// discovered its services.
///
/// # Errors
///
/// Returns [`BleError::CharacteristicNotFound`] if no characteristic with
/// the given UUID is present.
fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, BleError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(BleError::CharacteristicNotFound { uuid })
}

/// Write a descriptor. CCCD writes map onto btleplug's subscription calls,
/// since the backend owns that descriptor.
async fn write_descriptor(
    peripheral: &Peripheral,
    characteristic: Uuid,
    descriptor: Uuid,
    value: &[u8],
) -> Result<(), BleError> {
    let characteristic = find_characteristic(peripheral, characteristic)?;

    if descriptor == CLIENT_CHARACTERISTIC_CONFIG {
        return match cccd_action(value) {
            CccdAction::Subscribe => Ok(peripheral.subscribe(&characteristic).await?),
            CccdAction::Unsubscribe => Ok(peripheral.unsubscribe(&characteristic).await?),
        };
    }

    let descriptor = characteristic
        .descriptors
        .iter()
        .find(|d| d.uuid == descriptor)
        .ok_or(BleError::CharacteristicNotFound { uuid: descriptor })?;
    Ok(peripheral.write_descriptor(descriptor, value).await?)
}

async fn write_characteristic(
    peripheral: &Peripheral,
    characteristic: Uuid,
    value: &[u8],
) -> Result<(), BleError> {
    let characteristic = find_characteristic(peripheral, characteristic)?;
    Ok(peripheral
        .write(&characteristic, value, WriteType::WithResponse)
        .await?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CccdAction {
    Subscribe,
    Unsubscribe,
}

fn cccd_action(value: &[u8]) -> CccdAction {
    if value == DISABLE_NOTIFICATION_VALUE {
        CccdAction::Unsubscribe
    } else {
        debug_assert!(value == ENABLE_NOTIFICATION_VALUE || value == ENABLE_INDICATION_VALUE);
        CccdAction::Subscribe
    }
}

/// Convert btleplug's discovered services into a [`GattTable`].
///
/// Backends such as BlueZ hide the CCCD from the descriptor list, so one is
/// added to every characteristic that can notify or indicate.
pub(crate) fn gatt_table(services: &BTreeSet<Service>) -> GattTable {
    services
        .iter()
        .map(|service| {
            GattService::new(
                service.uuid,
                service
                    .characteristics
                    .iter()
                    .map(gatt_characteristic)
                    .collect(),
            )
        })
        .collect()
}

fn gatt_characteristic(characteristic: &Characteristic) -> GattCharacteristic {
    let mut descriptors: Vec<Uuid> = characteristic.descriptors.iter().map(|d| d.uuid).collect();
    let notifies = characteristic
        .properties
        .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE);
    if notifies && !descriptors.contains(&CLIENT_CHARACTERISTIC_CONFIG) {
        descriptors.push(CLIENT_CHARACTERISTIC_CONFIG);
    }
    GattCharacteristic::new(characteristic.uuid, descriptors)
}
