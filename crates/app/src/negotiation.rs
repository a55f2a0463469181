//! Negotiation state machine: drives a peripheral from connect to streaming.
//!
//! The transport reports completions as untagged "a write finished" events,
//! so the current [`NegotiationState`] is what correlates each completion
//! with the request it answers. Every step issues exactly one outstanding
//! request and advances only on its completion:
//!
//! 1. connect → `Connected`
//! 2. discover services → `ServicesDiscovered`
//! 3. illuminance CCCD write → `DescriptorWritten`
//! 4. temperature CCCD write → `DescriptorWritten`
//! 5. illuminance sensor-on write → `CharacteristicWritten`
//! 6. temperature sensor-on write → `CharacteristicWritten`
//! 7. streaming
//!
//! A `Disconnected` event in any state tears the session down.

use uuid::Uuid;

use sensortag_domain::codec;
use sensortag_domain::error::{SessionError, WriteStep};
use sensortag_domain::gatt::{GattCharacteristic, GattStatus, GattTable};
use sensortag_domain::id::SessionId;
use sensortag_domain::peripheral::PeripheralHandle;
use sensortag_domain::profile::{
    CLIENT_CHARACTERISTIC_CONFIG, ENABLE_NOTIFICATION_VALUE, SENSOR_ON, SensorKind,
};
use sensortag_domain::reading::SensorReading;

use crate::ports::{
    DisconnectReason, GattSession, SessionEvent, SessionEventPublisher, TransportEvent,
    TransportEventKind,
};
use crate::session::{LinkStatus, NegotiationState, SessionState};

/// Owns the single active session and reacts to transport events.
///
/// Processing is synchronous: [`handle`](Self::handle) advances the state
/// and issues the next command before returning.
pub struct Negotiator<T, P> {
    transport: T,
    publisher: P,
    session: Option<SessionState>,
    next_id: SessionId,
}

impl<T: GattSession, P: SessionEventPublisher> Negotiator<T, P> {
    #[must_use]
    pub fn new(transport: T, publisher: P) -> Self {
        Self {
            transport,
            publisher,
            session: None,
            next_id: SessionId::FIRST,
        }
    }

    /// Current negotiation state; [`NegotiationState::Idle`] without a session.
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.session
            .as_ref()
            .map_or(NegotiationState::Idle, SessionState::state)
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start a session with `peripheral`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionActive`] if a session already exists,
    /// or [`SessionError::TransportUnavailable`] if the connect command
    /// cannot be issued. The machine stays idle in both cases.
    pub fn connect(&mut self, peripheral: PeripheralHandle) -> Result<SessionId, SessionError> {
        if let Some(active) = &self.session {
            tracing::warn!(
                session = %active.id(),
                "connect requested while a session is active"
            );
            return Err(SessionError::SessionActive);
        }

        let id = self.next_id;
        self.next_id = id.next();
        self.transport.connect(id, &peripheral)?;

        tracing::info!(
            session = %id,
            address = %peripheral.address(),
            name = peripheral.display_name(),
            "connecting to peripheral"
        );
        self.session = Some(SessionState::connecting(id, peripheral));
        Ok(id)
    }

    /// Tear the session down on request. No-op when idle.
    pub fn close(&mut self) {
        self.teardown(DisconnectReason::Requested);
    }

    /// Single entry point for transport events.
    ///
    /// Events for a session other than the current one are dropped.
    pub fn handle(&mut self, event: TransportEvent) {
        let Some(session) = &self.session else {
            tracing::debug!(session = %event.session, "ignoring transport event while idle");
            return;
        };
        if event.session != session.id() {
            tracing::debug!(
                session = %event.session,
                current = %session.id(),
                "ignoring transport event for stale session"
            );
            return;
        }

        let outcome = match (session.state(), event.kind) {
            (_, TransportEventKind::Disconnected) => {
                self.on_disconnected();
                Ok(())
            }
            (_, TransportEventKind::ValueChanged { characteristic, value }) => {
                self.on_value_changed(characteristic, &value);
                Ok(())
            }
            (NegotiationState::Connecting, TransportEventKind::Connected) => self.on_connected(),
            (
                NegotiationState::ServiceDiscovery,
                TransportEventKind::ServicesDiscovered { status, table },
            ) => self.on_services_discovered(status, table),
            (
                NegotiationState::ConfiguringIlluminanceNotify,
                TransportEventKind::DescriptorWritten { status },
            ) => check(status, WriteStep::NotifyDescriptor(SensorKind::Illuminance)).and_then(
                |()| {
                    self.configure_notifications(
                        SensorKind::Temperature,
                        NegotiationState::ConfiguringTemperatureNotify,
                    )
                },
            ),
            (
                NegotiationState::ConfiguringTemperatureNotify,
                TransportEventKind::DescriptorWritten { status },
            ) => check(status, WriteStep::NotifyDescriptor(SensorKind::Temperature)).and_then(
                |()| {
                    self.enable_sensor(
                        SensorKind::Illuminance,
                        NegotiationState::EnablingIlluminanceSensor,
                    )
                },
            ),
            (
                NegotiationState::EnablingIlluminanceSensor,
                TransportEventKind::CharacteristicWritten { status },
            ) => check(status, WriteStep::SensorEnable(SensorKind::Illuminance)).and_then(|()| {
                self.enable_sensor(
                    SensorKind::Temperature,
                    NegotiationState::EnablingTemperatureSensor,
                )
            }),
            (
                NegotiationState::EnablingTemperatureSensor,
                TransportEventKind::CharacteristicWritten { status },
            ) => check(status, WriteStep::SensorEnable(SensorKind::Temperature))
                .map(|()| self.on_sensors_enabled()),
            (state, kind) => {
                tracing::warn!(%state, event = ?kind, "ignoring unexpected transport event");
                Ok(())
            }
        };

        if let Err(err) = outcome {
            self.abort(err);
        }
    }

    fn on_connected(&mut self) -> Result<(), SessionError> {
        let Self {
            transport,
            publisher,
            session: Some(session),
            ..
        } = self
        else {
            return Ok(());
        };

        session.link = LinkStatus::Connected;
        publisher.publish(SessionEvent::Connected(session.peripheral().clone()));
        transport.discover_services(session.id())?;
        advance(session, NegotiationState::ServiceDiscovery);
        Ok(())
    }

    fn on_services_discovered(
        &mut self,
        status: GattStatus,
        table: GattTable,
    ) -> Result<(), SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        if !status.is_success() {
            session.stalled = true;
            tracing::warn!(
                session = %session.id(),
                %status,
                "service discovery failed, session stalled"
            );
            self.publisher
                .publish(SessionEvent::Failed(SessionError::ServiceDiscoveryFailed {
                    status,
                }));
            return Ok(());
        }

        tracing::debug!(
            session = %session.id(),
            services = table.services().len(),
            "services discovered"
        );
        session.stalled = false;
        session.table = table;
        self.configure_notifications(
            SensorKind::Illuminance,
            NegotiationState::ConfiguringIlluminanceNotify,
        )
    }

    /// Enable notifications for `sensor`'s data characteristic and write its
    /// CCCD, then move to `next`.
    fn configure_notifications(
        &mut self,
        sensor: SensorKind,
        next: NegotiationState,
    ) -> Result<(), SessionError> {
        let Self {
            transport,
            session: Some(session),
            ..
        } = self
        else {
            return Ok(());
        };

        let data = sensor.data_characteristic();
        let characteristic = locate(&session.table, sensor.service(), data)?;
        if !characteristic.has_descriptor(CLIENT_CHARACTERISTIC_CONFIG) {
            return Err(SessionError::AttributeNotFound {
                uuid: CLIENT_CHARACTERISTIC_CONFIG,
            });
        }

        transport.enable_local_notifications(session.id(), data)?;
        transport.write_descriptor(
            session.id(),
            data,
            CLIENT_CHARACTERISTIC_CONFIG,
            &ENABLE_NOTIFICATION_VALUE,
        )?;
        advance(session, next);
        Ok(())
    }

    /// Write the sensor-on value to `sensor`'s configuration characteristic,
    /// then move to `next`.
    fn enable_sensor(
        &mut self,
        sensor: SensorKind,
        next: NegotiationState,
    ) -> Result<(), SessionError> {
        let Self {
            transport,
            session: Some(session),
            ..
        } = self
        else {
            return Ok(());
        };

        let config = sensor.config_characteristic();
        locate(&session.table, sensor.service(), config)?;
        transport.write_characteristic(session.id(), config, &SENSOR_ON)?;
        advance(session, next);
        Ok(())
    }

    fn on_sensors_enabled(&mut self) {
        if let Some(session) = self.session.as_mut() {
            advance(session, NegotiationState::Streaming);
            tracing::info!(
                session = %session.id(),
                address = %session.peripheral().address(),
                "sensors enabled, streaming"
            );
        }
        self.publisher.publish(SessionEvent::Streaming);
    }

    fn on_value_changed(&self, characteristic: Uuid, value: &[u8]) {
        let Some(sensor) = SensorKind::from_data_characteristic(characteristic) else {
            tracing::trace!(%characteristic, "ignoring notification from unknown characteristic");
            return;
        };

        match codec::decode(sensor, value) {
            Ok(measurement) => {
                tracing::trace!(%sensor, %measurement, "decoded notification");
                self.publisher
                    .publish(SessionEvent::Reading(SensorReading::new(
                        characteristic,
                        measurement,
                    )));
            }
            Err(err) => {
                let err = SessionError::from(err);
                tracing::warn!(%err, %characteristic, "dropping notification");
            }
        }
    }

    fn on_disconnected(&mut self) {
        let reason = if self.state() == NegotiationState::Connecting {
            DisconnectReason::ConnectFailed
        } else {
            self.publisher
                .publish(SessionEvent::Failed(SessionError::UnexpectedDisconnect));
            DisconnectReason::ConnectionLost
        };
        if let Some(session) = self.session.as_mut() {
            session.link = LinkStatus::Disconnected;
        }
        self.teardown(reason);
    }

    fn abort(&mut self, err: SessionError) {
        tracing::error!(%err, state = %self.state(), "negotiation failed");
        self.publisher.publish(SessionEvent::Failed(err));
        self.teardown(DisconnectReason::Aborted);
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        let Some(session) = self.session.take() else {
            return;
        };

        self.transport.close(session.id());
        tracing::info!(
            session = %session.id(),
            from = %session.state(),
            ?reason,
            "session torn down"
        );
        self.publisher
            .publish(SessionEvent::Disconnected { reason });
    }
}

fn advance(session: &mut SessionState, next: NegotiationState) {
    tracing::debug!(
        session = %session.id(),
        from = %session.state,
        to = %next,
        "negotiation advanced"
    );
    session.state = next;
}

fn check(status: GattStatus, step: WriteStep) -> Result<(), SessionError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SessionError::WriteRejected { step, status })
    }
}

/// Find `characteristic` inside `service` in the discovered table.
fn locate(
    table: &GattTable,
    service: Uuid,
    characteristic: Uuid,
) -> Result<&GattCharacteristic, SessionError> {
    table
        .service(service)
        .ok_or(SessionError::AttributeNotFound { uuid: service })?
        .characteristic(characteristic)
        .ok_or(SessionError::AttributeNotFound {
            uuid: characteristic,
        })
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use sensortag_domain::error::TransportError;
    use sensortag_domain::gatt::{GattCharacteristic, GattService};
    use sensortag_domain::id::PeripheralAddress;
    use sensortag_domain::profile::{
        IR_TEMP_CONFIG, IR_TEMP_DATA, IR_TEMP_SERVICE, LIGHT_SENSOR_CONFIG, LIGHT_SENSOR_DATA,
        LIGHT_SENSOR_SERVICE,
    };
    use sensortag_domain::reading::Measurement;

    use super::*;
    use crate::event_bus::InProcessEventBus;

    const CCCD: Uuid = CLIENT_CHARACTERISTIC_CONFIG;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Command {
        Connect(SessionId, PeripheralAddress),
        DiscoverServices(SessionId),
        EnableLocalNotifications(SessionId, Uuid),
        WriteDescriptor(SessionId, Uuid, Uuid, Vec<u8>),
        WriteCharacteristic(SessionId, Uuid, Vec<u8>),
        Close(SessionId),
    }

    #[derive(Default)]
    struct RecordingTransport {
        commands: Vec<Command>,
        refuse_connect: bool,
        drop_descriptor_writes: bool,
    }

    impl RecordingTransport {
        fn descriptor_writes(&self) -> usize {
            self.commands
                .iter()
                .filter(|c| matches!(c, Command::WriteDescriptor(..)))
                .count()
        }

        fn characteristic_writes(&self) -> Vec<Uuid> {
            self.commands
                .iter()
                .filter_map(|c| match c {
                    Command::WriteCharacteristic(_, uuid, _) => Some(*uuid),
                    _ => None,
                })
                .collect()
        }
    }

    impl GattSession for RecordingTransport {
        fn connect(
            &mut self,
            session: SessionId,
            peripheral: &PeripheralHandle,
        ) -> Result<(), TransportError> {
            if self.refuse_connect {
                return Err(TransportError::AdapterUnavailable);
            }
            self.commands
                .push(Command::Connect(session, peripheral.address()));
            Ok(())
        }

        fn discover_services(&mut self, session: SessionId) -> Result<(), TransportError> {
            self.commands.push(Command::DiscoverServices(session));
            Ok(())
        }

        fn enable_local_notifications(
            &mut self,
            session: SessionId,
            characteristic: Uuid,
        ) -> Result<(), TransportError> {
            self.commands
                .push(Command::EnableLocalNotifications(session, characteristic));
            Ok(())
        }

        fn write_descriptor(
            &mut self,
            session: SessionId,
            characteristic: Uuid,
            descriptor: Uuid,
            value: &[u8],
        ) -> Result<(), TransportError> {
            if self.drop_descriptor_writes {
                return Err(TransportError::ChannelClosed);
            }
            self.commands.push(Command::WriteDescriptor(
                session,
                characteristic,
                descriptor,
                value.to_vec(),
            ));
            Ok(())
        }

        fn write_characteristic(
            &mut self,
            session: SessionId,
            characteristic: Uuid,
            value: &[u8],
        ) -> Result<(), TransportError> {
            self.commands.push(Command::WriteCharacteristic(
                session,
                characteristic,
                value.to_vec(),
            ));
            Ok(())
        }

        fn close(&mut self, session: SessionId) {
            self.commands.push(Command::Close(session));
        }
    }

    type TestNegotiator = Negotiator<RecordingTransport, InProcessEventBus>;

    fn peripheral() -> PeripheralHandle {
        PeripheralHandle::new(
            PeripheralAddress::new([0xB0, 0xB4, 0x48, 0xC9, 0x0A, 0x82]),
            Some("CC2650 SensorTag".to_owned()),
        )
    }

    fn sensortag_table() -> GattTable {
        GattTable::new(vec![
            GattService::new(
                LIGHT_SENSOR_SERVICE,
                vec![
                    GattCharacteristic::new(LIGHT_SENSOR_DATA, vec![CCCD]),
                    GattCharacteristic::new(LIGHT_SENSOR_CONFIG, vec![]),
                ],
            ),
            GattService::new(
                IR_TEMP_SERVICE,
                vec![
                    GattCharacteristic::new(IR_TEMP_DATA, vec![CCCD]),
                    GattCharacteristic::new(IR_TEMP_CONFIG, vec![]),
                ],
            ),
        ])
    }

    fn fixture() -> (TestNegotiator, broadcast::Receiver<SessionEvent>) {
        let bus = InProcessEventBus::new(64);
        let rx = bus.subscribe();
        (Negotiator::new(RecordingTransport::default(), bus), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    /// The completion events of a successful negotiation, in order.
    fn happy_path() -> Vec<TransportEventKind> {
        vec![
            TransportEventKind::Connected,
            TransportEventKind::ServicesDiscovered {
                status: GattStatus::SUCCESS,
                table: sensortag_table(),
            },
            TransportEventKind::DescriptorWritten {
                status: GattStatus::SUCCESS,
            },
            TransportEventKind::DescriptorWritten {
                status: GattStatus::SUCCESS,
            },
            TransportEventKind::CharacteristicWritten {
                status: GattStatus::SUCCESS,
            },
            TransportEventKind::CharacteristicWritten {
                status: GattStatus::SUCCESS,
            },
        ]
    }

    fn inject(negotiator: &mut TestNegotiator, id: SessionId, kinds: Vec<TransportEventKind>) {
        for kind in kinds {
            negotiator.handle(TransportEvent::new(id, kind));
        }
    }

    fn streaming() -> (TestNegotiator, broadcast::Receiver<SessionEvent>, SessionId) {
        let (mut negotiator, mut rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        inject(&mut negotiator, id, happy_path());
        assert_eq!(negotiator.state(), NegotiationState::Streaming);
        drain(&mut rx);
        (negotiator, rx, id)
    }

    // ── Happy path ──────────────────────────────────────────────────────

    #[test]
    fn should_issue_configuration_writes_in_order_and_reach_streaming() {
        let (mut negotiator, mut rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        inject(&mut negotiator, id, happy_path());

        assert_eq!(negotiator.state(), NegotiationState::Streaming);
        assert_eq!(
            negotiator.transport().commands,
            vec![
                Command::Connect(id, peripheral().address()),
                Command::DiscoverServices(id),
                Command::EnableLocalNotifications(id, LIGHT_SENSOR_DATA),
                Command::WriteDescriptor(id, LIGHT_SENSOR_DATA, CCCD, vec![0x01, 0x00]),
                Command::EnableLocalNotifications(id, IR_TEMP_DATA),
                Command::WriteDescriptor(id, IR_TEMP_DATA, CCCD, vec![0x01, 0x00]),
                Command::WriteCharacteristic(id, LIGHT_SENSOR_CONFIG, vec![0x01]),
                Command::WriteCharacteristic(id, IR_TEMP_CONFIG, vec![0x01]),
            ]
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Connected(peripheral()),
                SessionEvent::Streaming
            ]
        );

        let session = negotiator.session().unwrap();
        assert!(session.notifications_configured());
        assert!(session.sensors_enabled());
        assert_eq!(session.link(), LinkStatus::Connected);
    }

    #[test]
    fn should_not_enable_sensors_before_both_descriptor_writes_complete() {
        let (mut negotiator, _rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        let mut events = happy_path().into_iter();

        inject(&mut negotiator, id, events.by_ref().take(3).collect());
        assert_eq!(
            negotiator.state(),
            NegotiationState::ConfiguringTemperatureNotify
        );
        assert_eq!(negotiator.transport().descriptor_writes(), 2);
        assert!(negotiator.transport().characteristic_writes().is_empty());
        assert!(!negotiator.session().unwrap().notifications_configured());

        inject(&mut negotiator, id, events.by_ref().take(1).collect());
        assert_eq!(
            negotiator.transport().characteristic_writes(),
            vec![LIGHT_SENSOR_CONFIG]
        );

        inject(&mut negotiator, id, events.collect());
        assert_eq!(
            negotiator.transport().characteristic_writes(),
            vec![LIGHT_SENSOR_CONFIG, IR_TEMP_CONFIG]
        );
    }

    #[test]
    fn should_ignore_completion_that_does_not_match_the_outstanding_request() {
        let (mut negotiator, _rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        inject(&mut negotiator, id, happy_path().into_iter().take(2).collect());
        let issued = negotiator.transport().commands.len();

        negotiator.handle(TransportEvent::new(
            id,
            TransportEventKind::CharacteristicWritten {
                status: GattStatus::SUCCESS,
            },
        ));
        negotiator.handle(TransportEvent::new(id, TransportEventKind::Connected));

        assert_eq!(
            negotiator.state(),
            NegotiationState::ConfiguringIlluminanceNotify
        );
        assert_eq!(negotiator.transport().commands.len(), issued);
    }

    // ── Service discovery failure ───────────────────────────────────────

    #[test]
    fn should_stall_and_surface_error_when_service_discovery_fails() {
        let (mut negotiator, mut rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        inject(
            &mut negotiator,
            id,
            vec![
                TransportEventKind::Connected,
                TransportEventKind::ServicesDiscovered {
                    status: GattStatus::FAILURE,
                    table: GattTable::default(),
                },
            ],
        );

        assert_eq!(negotiator.state(), NegotiationState::ServiceDiscovery);
        assert!(negotiator.session().unwrap().is_stalled());
        assert_eq!(negotiator.transport().descriptor_writes(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Connected(peripheral()),
                SessionEvent::Failed(SessionError::ServiceDiscoveryFailed {
                    status: GattStatus::FAILURE
                }),
            ]
        );
    }

    #[test]
    fn should_resume_when_a_later_discovery_succeeds() {
        let (mut negotiator, _rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        inject(
            &mut negotiator,
            id,
            vec![
                TransportEventKind::Connected,
                TransportEventKind::ServicesDiscovered {
                    status: GattStatus::FAILURE,
                    table: GattTable::default(),
                },
                TransportEventKind::ServicesDiscovered {
                    status: GattStatus::SUCCESS,
                    table: sensortag_table(),
                },
            ],
        );

        assert_eq!(
            negotiator.state(),
            NegotiationState::ConfiguringIlluminanceNotify
        );
        assert!(!negotiator.session().unwrap().is_stalled());
    }

    // ── Fatal negotiation errors ────────────────────────────────────────

    #[test]
    fn should_abort_when_notification_descriptor_is_missing() {
        let (mut negotiator, mut rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        let table = GattTable::new(vec![GattService::new(
            LIGHT_SENSOR_SERVICE,
            vec![GattCharacteristic::new(LIGHT_SENSOR_DATA, vec![])],
        )]);
        inject(
            &mut negotiator,
            id,
            vec![
                TransportEventKind::Connected,
                TransportEventKind::ServicesDiscovered {
                    status: GattStatus::SUCCESS,
                    table,
                },
            ],
        );

        assert_eq!(negotiator.state(), NegotiationState::Idle);
        assert_eq!(negotiator.transport().descriptor_writes(), 0);
        assert_eq!(
            negotiator.transport().commands.last(),
            Some(&Command::Close(id))
        );
        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::Failed(SessionError::AttributeNotFound {
            uuid: CCCD
        })));
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Disconnected {
                reason: DisconnectReason::Aborted
            })
        );
    }

    #[test]
    fn should_abort_when_temperature_service_is_missing() {
        let (mut negotiator, mut rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        let table = GattTable::new(vec![sensortag_table().services()[0].clone()]);
        inject(
            &mut negotiator,
            id,
            vec![
                TransportEventKind::Connected,
                TransportEventKind::ServicesDiscovered {
                    status: GattStatus::SUCCESS,
                    table,
                },
                TransportEventKind::DescriptorWritten {
                    status: GattStatus::SUCCESS,
                },
            ],
        );

        assert_eq!(negotiator.state(), NegotiationState::Idle);
        assert_eq!(negotiator.transport().descriptor_writes(), 1);
        assert!(
            drain(&mut rx).contains(&SessionEvent::Failed(SessionError::AttributeNotFound {
                uuid: IR_TEMP_SERVICE
            }))
        );
    }

    #[test]
    fn should_abort_when_a_configuration_write_is_rejected() {
        let (mut negotiator, mut rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        let mut events = happy_path();
        events[4] = TransportEventKind::CharacteristicWritten {
            status: GattStatus::new(0x03),
        };
        inject(&mut negotiator, id, events.into_iter().take(5).collect());

        assert_eq!(negotiator.state(), NegotiationState::Idle);
        assert_eq!(
            negotiator.transport().characteristic_writes(),
            vec![LIGHT_SENSOR_CONFIG]
        );
        assert!(drain(&mut rx).contains(&SessionEvent::Failed(
            SessionError::WriteRejected {
                step: WriteStep::SensorEnable(SensorKind::Illuminance),
                status: GattStatus::new(0x03),
            }
        )));
    }

    #[test]
    fn should_abort_when_a_notification_descriptor_write_is_rejected() {
        let (mut negotiator, mut rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        let mut events = happy_path();
        events[3] = TransportEventKind::DescriptorWritten {
            status: GattStatus::FAILURE,
        };
        inject(&mut negotiator, id, events.into_iter().take(4).collect());

        assert_eq!(negotiator.state(), NegotiationState::Idle);
        assert_eq!(negotiator.transport().descriptor_writes(), 2);
        assert!(negotiator.transport().characteristic_writes().is_empty());
        assert_eq!(
            negotiator.transport().commands.last(),
            Some(&Command::Close(id))
        );
        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::Failed(SessionError::WriteRejected {
            step: WriteStep::NotifyDescriptor(SensorKind::Temperature),
            status: GattStatus::FAILURE,
        })));
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Disconnected {
                reason: DisconnectReason::Aborted
            })
        );
    }

    #[test]
    fn should_abort_when_a_command_cannot_be_issued_mid_negotiation() {
        let bus = InProcessEventBus::new(64);
        let mut rx = bus.subscribe();
        let transport = RecordingTransport {
            drop_descriptor_writes: true,
            ..RecordingTransport::default()
        };
        let mut negotiator = Negotiator::new(transport, bus);
        let id = negotiator.connect(peripheral()).unwrap();
        inject(&mut negotiator, id, happy_path().into_iter().take(2).collect());

        assert_eq!(negotiator.state(), NegotiationState::Idle);
        assert!(negotiator.session().is_none());
        assert_eq!(negotiator.transport().descriptor_writes(), 0);
        assert_eq!(
            negotiator.transport().commands.last(),
            Some(&Command::Close(id))
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Connected(peripheral()),
                SessionEvent::Failed(SessionError::TransportUnavailable(
                    TransportError::ChannelClosed
                )),
                SessionEvent::Disconnected {
                    reason: DisconnectReason::Aborted
                },
            ]
        );
    }

    // ── Streaming ───────────────────────────────────────────────────────

    #[test]
    fn should_route_notifications_to_matching_decoder() {
        let (mut negotiator, mut rx, id) = streaming();
        inject(
            &mut negotiator,
            id,
            vec![
                TransportEventKind::ValueChanged {
                    characteristic: LIGHT_SENSOR_DATA,
                    value: vec![0x0A, 0x00],
                },
                TransportEventKind::ValueChanged {
                    characteristic: IR_TEMP_DATA,
                    value: vec![0x00, 0x00, 0x80, 0x02],
                },
            ],
        );

        let readings: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Reading(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].characteristic, LIGHT_SENSOR_DATA);
        assert!(matches!(
            readings[0].measurement,
            Measurement::Illuminance { lux } if (lux - 0.10).abs() < 1e-9
        ));
        assert_eq!(readings[1].characteristic, IR_TEMP_DATA);
        assert!(matches!(
            readings[1].measurement,
            Measurement::Temperature { celsius } if (celsius - 5.0).abs() < 1e-9
        ));
    }

    #[test]
    fn should_drop_short_illuminance_payload_and_keep_streaming() {
        let (mut negotiator, mut rx, id) = streaming();
        negotiator.handle(TransportEvent::new(
            id,
            TransportEventKind::ValueChanged {
                characteristic: LIGHT_SENSOR_DATA,
                value: vec![0x0A],
            },
        ));

        assert!(drain(&mut rx).is_empty());
        assert_eq!(negotiator.state(), NegotiationState::Streaming);

        negotiator.handle(TransportEvent::new(
            id,
            TransportEventKind::ValueChanged {
                characteristic: LIGHT_SENSOR_DATA,
                value: vec![0x0A, 0x00],
            },
        ));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn should_ignore_notifications_from_unknown_characteristics() {
        let (mut negotiator, mut rx, id) = streaming();
        negotiator.handle(TransportEvent::new(
            id,
            TransportEventKind::ValueChanged {
                characteristic: LIGHT_SENSOR_CONFIG,
                value: vec![0x01],
            },
        ));

        assert!(drain(&mut rx).is_empty());
        assert_eq!(negotiator.state(), NegotiationState::Streaming);
    }

    #[test]
    fn should_issue_no_further_commands_while_streaming() {
        let (mut negotiator, _rx, id) = streaming();
        let issued = negotiator.transport().commands.len();
        inject(
            &mut negotiator,
            id,
            vec![
                TransportEventKind::DescriptorWritten {
                    status: GattStatus::SUCCESS,
                },
                TransportEventKind::CharacteristicWritten {
                    status: GattStatus::SUCCESS,
                },
            ],
        );

        assert_eq!(negotiator.state(), NegotiationState::Streaming);
        assert_eq!(negotiator.transport().commands.len(), issued);
    }

    // ── Teardown ────────────────────────────────────────────────────────

    #[test]
    fn should_teardown_on_disconnect_from_every_state() {
        for steps in 0..=happy_path().len() {
            let (mut negotiator, mut rx) = fixture();
            let id = negotiator.connect(peripheral()).unwrap();
            inject(&mut negotiator, id, happy_path().into_iter().take(steps).collect());
            drain(&mut rx);

            negotiator.handle(TransportEvent::new(id, TransportEventKind::Disconnected));

            assert_eq!(negotiator.state(), NegotiationState::Idle, "after {steps} steps");
            assert!(negotiator.session().is_none());
            assert_eq!(
                negotiator.transport().commands.last(),
                Some(&Command::Close(id))
            );
            let expected = if steps == 0 {
                DisconnectReason::ConnectFailed
            } else {
                DisconnectReason::ConnectionLost
            };
            assert_eq!(
                drain(&mut rx).last(),
                Some(&SessionEvent::Disconnected { reason: expected })
            );

            let issued = negotiator.transport().commands.len();
            negotiator.handle(TransportEvent::new(id, TransportEventKind::Disconnected));
            assert_eq!(negotiator.transport().commands.len(), issued);
            assert!(drain(&mut rx).is_empty());
        }
    }

    #[test]
    fn should_surface_unexpected_disconnect_as_connection_lost() {
        let (mut negotiator, mut rx, id) = streaming();
        negotiator.handle(TransportEvent::new(id, TransportEventKind::Disconnected));

        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Failed(SessionError::UnexpectedDisconnect),
                SessionEvent::Disconnected {
                    reason: DisconnectReason::ConnectionLost
                },
            ]
        );
    }

    #[test]
    fn should_close_on_request_from_mid_negotiation() {
        let (mut negotiator, mut rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();
        inject(&mut negotiator, id, happy_path().into_iter().take(3).collect());
        drain(&mut rx);

        negotiator.close();
        negotiator.close();

        assert_eq!(negotiator.state(), NegotiationState::Idle);
        let closes = negotiator
            .transport()
            .commands
            .iter()
            .filter(|c| **c == Command::Close(id))
            .count();
        assert_eq!(closes, 1);
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::Disconnected {
                reason: DisconnectReason::Requested
            }]
        );
    }

    #[test]
    fn should_ignore_late_callbacks_after_teardown() {
        let (mut negotiator, mut rx) = fixture();
        let old = negotiator.connect(peripheral()).unwrap();
        inject(&mut negotiator, old, happy_path().into_iter().take(2).collect());
        negotiator.close();

        let new = negotiator.connect(peripheral()).unwrap();
        assert_ne!(old, new);
        drain(&mut rx);
        let issued = negotiator.transport().commands.len();

        inject(
            &mut negotiator,
            old,
            vec![
                TransportEventKind::Connected,
                TransportEventKind::DescriptorWritten {
                    status: GattStatus::SUCCESS,
                },
                TransportEventKind::Disconnected,
            ],
        );

        assert_eq!(negotiator.state(), NegotiationState::Connecting);
        assert_eq!(negotiator.session().unwrap().id(), new);
        assert_eq!(negotiator.transport().commands.len(), issued);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn should_ignore_events_while_idle() {
        let (mut negotiator, mut rx) = fixture();
        negotiator.handle(TransportEvent::new(
            SessionId::FIRST,
            TransportEventKind::Connected,
        ));

        assert_eq!(negotiator.state(), NegotiationState::Idle);
        assert!(negotiator.transport().commands.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    // ── Connect ─────────────────────────────────────────────────────────

    #[test]
    fn should_reject_second_connect_while_session_active() {
        let (mut negotiator, _rx) = fixture();
        let id = negotiator.connect(peripheral()).unwrap();

        let err = negotiator.connect(peripheral()).unwrap_err();

        assert_eq!(err, SessionError::SessionActive);
        assert_eq!(negotiator.session().unwrap().id(), id);
        assert_eq!(negotiator.transport().commands.len(), 1);
    }

    #[test]
    fn should_stay_idle_when_transport_refuses_connect() {
        let bus = InProcessEventBus::new(8);
        let transport = RecordingTransport {
            refuse_connect: true,
            ..RecordingTransport::default()
        };
        let mut negotiator = Negotiator::new(transport, bus);

        let err = negotiator.connect(peripheral()).unwrap_err();

        assert_eq!(
            err,
            SessionError::TransportUnavailable(TransportError::AdapterUnavailable)
        );
        assert_eq!(negotiator.state(), NegotiationState::Idle);
    }
}
