//! BLE scanner: discovers SensorTag peripherals within a bounded window.
//!
//! [`BleDiscovery`] switches the central's scan mode on and off for the
//! [`ScanController`]; [`run_scan`] feeds the controller from the central's
//! event stream until the window closes.

use btleplug::api::{Central as _, CentralEvent, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use tokio_stream::StreamExt as _;

use sensortag_app::ports::{DiscoveryPort, SessionEventPublisher};
use sensortag_app::registry::PeripheralRegistry;
use sensortag_app::scan::ScanController;
use sensortag_domain::error::TransportError;
use sensortag_domain::id::PeripheralAddress;
use sensortag_domain::peripheral::PeripheralHandle;

use crate::config::BleConfig;
use crate::error::BleError;

/// [`DiscoveryPort`] backed by a btleplug central.
#[derive(Clone)]
pub struct BleDiscovery {
    central: Adapter,
}

impl BleDiscovery {
    #[must_use]
    pub fn new(central: Adapter) -> Self {
        Self { central }
    }
}

impl DiscoveryPort for BleDiscovery {
    async fn start_discovery(&self) -> Result<(), TransportError> {
        self.central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|err| BleError::from(err).into_transport("start scan"))
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.central
            .stop_scan()
            .await
            .map_err(|err| BleError::from(err).into_transport("stop scan"))
    }
}

/// Run a single discovery window on `central`.
///
/// Every peripheral seen for the first time is published as it arrives;
/// the registry of everything found is returned once the window closes.
///
/// # Errors
///
/// Returns [`BleError`] when the adapter event stream cannot be opened or
/// the scan cannot be started.
pub(crate) async fn run_scan<P: SessionEventPublisher>(
    central: &Adapter,
    config: &BleConfig,
    publisher: P,
) -> Result<PeripheralRegistry, BleError> {
    let mut events = central.events().await?;
    let mut controller = ScanController::new(BleDiscovery::new(central.clone()), publisher);

    controller.start(config.scan_duration()).await?;

    while let Some(deadline) = controller.deadline() {
        match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id))) => {
                let Some(handle) = peripheral_handle(central, &id).await else {
                    continue;
                };

                let mac = handle.address().to_string();
                if !config.passes_filter(&mac) {
                    tracing::trace!(%mac, "filtered out by device_filter");
                    continue;
                }

                controller.on_found(handle);
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!("adapter event stream ended during scan");
                controller.stop().await?;
            }
            Err(_) => {
                controller.stop_if_expired().await?;
            }
        }
    }

    Ok(controller.into_registry())
}

async fn peripheral_handle(central: &Adapter, id: &PeripheralId) -> Option<PeripheralHandle> {
    let peripheral = central.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    Some(handle_from_properties(&properties))
}

/// Build a [`PeripheralHandle`] from advertised properties.
pub(crate) fn handle_from_properties(properties: &PeripheralProperties) -> PeripheralHandle {
    PeripheralHandle::new(
        PeripheralAddress::new(properties.address.into_inner()),
        properties.local_name.clone(),
    )
}
