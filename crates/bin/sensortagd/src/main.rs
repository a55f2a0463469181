//! # sensortagd: SensorTag streaming daemon
//!
//! Composition root that wires the BLE adapter to the application layer.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Initialise logging
//! - Log every session event published on the event bus
//! - Scan, pick the configured (or first) peripheral and stream from it
//! - Close the session on Ctrl-C, or once service discovery fails
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use anyhow::Context as _;
use tokio::sync::broadcast;

use sensortag_adapter_ble::SensorTagClient;
use sensortag_app::event_bus::InProcessEventBus;
use sensortag_app::ports::SessionEvent;
use sensortag_app::registry::PeripheralRegistry;
use sensortag_domain::error::SessionError;
use sensortag_domain::id::PeripheralAddress;
use sensortag_domain::peripheral::PeripheralHandle;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.filter.as_str())
        .init();

    let target = config.device_address()?;

    // Event bus
    let event_bus = InProcessEventBus::new(256);
    let logger = tokio::spawn(log_events(event_bus.subscribe()));

    // BLE
    let client = SensorTagClient::new(config.ble.clone(), event_bus.clone())
        .await
        .context("failed to open BLE adapter")?;
    let registry = client.scan().await.context("BLE scan failed")?;

    match select_peripheral(&registry, target) {
        Some(peripheral) => {
            tracing::info!(
                address = %peripheral.address(),
                name = peripheral.display_name(),
                "starting session"
            );
            let stop = session_stop(event_bus.subscribe());
            client
                .run_session(peripheral, stop)
                .await
                .context("session failed")?;
        }
        None => match target {
            Some(address) => tracing::warn!(%address, "configured peripheral not found"),
            None => tracing::warn!("no peripheral found"),
        },
    }

    drop(client);
    drop(event_bus);
    if let Err(err) = logger.await {
        tracing::warn!(%err, "event logger task failed");
    }

    tracing::info!("sensortagd stopped");
    Ok(())
}

/// Pick the peripheral to stream from: the configured address if set,
/// otherwise the first one found.
fn select_peripheral(
    registry: &PeripheralRegistry,
    target: Option<PeripheralAddress>,
) -> Option<PeripheralHandle> {
    match target {
        Some(address) => registry.find(address).cloned(),
        None => registry.get(0).cloned(),
    }
}

/// Resolve on Ctrl-C, or once the session stalls on a failed service
/// discovery.
async fn session_stop(events: broadcast::Receiver<SessionEvent>) {
    tokio::select! {
        () = shutdown_signal() => {}
        () = discovery_stall(events) => {
            tracing::warn!("service discovery failed, closing session");
        }
    }
}

async fn discovery_stall(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Failed(SessionError::ServiceDiscoveryFailed { .. })) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "cannot listen for Ctrl-C, running until disconnect");
        std::future::pending::<()>().await;
    }
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::PeripheralDiscovered(peripheral) => tracing::info!(
            address = %peripheral.address(),
            name = peripheral.display_name(),
            "peripheral discovered"
        ),
        SessionEvent::ScanStopped => tracing::info!("scan stopped"),
        SessionEvent::Connected(peripheral) => {
            tracing::info!(address = %peripheral.address(), "connected");
        }
        SessionEvent::Streaming => tracing::info!("streaming sensor readings"),
        SessionEvent::Reading(reading) => tracing::info!(
            sensor = %reading.measurement.sensor(),
            value = reading.measurement.value(),
            "{reading}"
        ),
        SessionEvent::Failed(err) => tracing::error!(%err, "session error"),
        SessionEvent::Disconnected { reason } => tracing::info!(?reason, "disconnected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(last: u8) -> PeripheralHandle {
        PeripheralHandle::new(
            PeripheralAddress::new([0xB0, 0xB4, 0x48, 0xC9, 0x0A, last]),
            None,
        )
    }

    fn registry() -> PeripheralRegistry {
        let mut registry = PeripheralRegistry::new();
        registry.add(handle(0x01));
        registry.add(handle(0x02));
        registry
    }

    #[test]
    fn should_select_first_peripheral_without_target() {
        assert_eq!(select_peripheral(&registry(), None), Some(handle(0x01)));
    }

    #[test]
    fn should_select_configured_peripheral() {
        let target = handle(0x02).address();
        assert_eq!(
            select_peripheral(&registry(), Some(target)),
            Some(handle(0x02))
        );
    }

    #[test]
    fn should_select_nothing_when_target_missing() {
        let target = handle(0x03).address();
        assert_eq!(select_peripheral(&registry(), Some(target)), None);
    }

    #[test]
    fn should_select_nothing_from_empty_registry() {
        assert_eq!(select_peripheral(&PeripheralRegistry::new(), None), None);
    }

    #[tokio::test]
    async fn should_resolve_stall_watch_on_service_discovery_failure() {
        use sensortag_app::ports::SessionEventPublisher as _;
        use sensortag_domain::gatt::GattStatus;

        let bus = InProcessEventBus::new(8);
        let watch = tokio::spawn(discovery_stall(bus.subscribe()));

        bus.publish(SessionEvent::Connected(handle(0x01)));
        bus.publish(SessionEvent::Failed(SessionError::ServiceDiscoveryFailed {
            status: GattStatus::FAILURE,
        }));

        watch.await.unwrap();
    }

    #[tokio::test]
    async fn should_keep_watching_through_other_failures() {
        use sensortag_app::ports::SessionEventPublisher as _;

        let bus = InProcessEventBus::new(8);
        let mut watch = tokio::spawn(discovery_stall(bus.subscribe()));

        bus.publish(SessionEvent::Failed(SessionError::UnexpectedDisconnect));
        tokio::task::yield_now().await;

        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), &mut watch)
                .await
                .is_err()
        );
        watch.abort();
    }

    #[tokio::test]
    async fn should_stop_logging_when_bus_is_dropped() {
        let bus = InProcessEventBus::new(8);
        let logger = tokio::spawn(log_events(bus.subscribe()));

        sensortag_app::ports::SessionEventPublisher::publish(&bus, SessionEvent::ScanStopped);
        drop(bus);

        logger.await.unwrap();
    }
}
