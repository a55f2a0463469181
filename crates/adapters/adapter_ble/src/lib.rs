//! # sensortag-adapter-ble
//!
//! BLE adapter: implements the application ports on top of `btleplug`
//! and drives a SensorTag session end to end.
//!
//! ## How it works
//!
//! [`SensorTagClient::scan`] opens one discovery window and returns the
//! peripherals it found. [`SensorTagClient::run_session`] spawns a GATT
//! worker and feeds its events, in order, to a
//! [`Negotiator`](sensortag_app::negotiation::Negotiator) until the session
//! ends or shutdown is requested.
//!
//! ## Supported sensors
//!
//! | Subsystem | Service | Data | Config |
//! |-----------|---------|------|--------|
//! | Light (OPT3001) | `f000aa70-…` | `f000aa71-…` | `f000aa72-…` |
//! | IR temperature | `f000aa00-…` | `f000aa01-…` | `f000aa02-…` |
//!
//! ## Dependency rule
//!
//! Depends on `sensortag-app` and `sensortag-domain` only.

mod config;
mod error;
mod gatt;
mod scanner;

pub use config::BleConfig;
pub use error::BleError;
pub use gatt::ChannelTransport;
pub use scanner::BleDiscovery;

use std::future::Future;

use btleplug::api::Manager as _;
use btleplug::platform::{Adapter, Manager};
use tokio::sync::mpsc;

use sensortag_app::negotiation::Negotiator;
use sensortag_app::ports::SessionEventPublisher;
use sensortag_app::registry::PeripheralRegistry;
use sensortag_app::session::NegotiationState;
use sensortag_domain::peripheral::PeripheralHandle;

use crate::gatt::GattWorker;

/// SensorTag client bound to the host's first BLE adapter.
pub struct SensorTagClient<P> {
    central: Adapter,
    config: BleConfig,
    publisher: P,
}

impl<P: SessionEventPublisher + Clone> SensorTagClient<P> {
    /// Open the first BLE adapter on the host.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::NotAvailable`] when the host has no adapter, or
    /// [`BleError::Btle`] when the BLE manager cannot be created.
    pub async fn new(config: BleConfig, publisher: P) -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let central = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleError::NotAvailable)?;

        Ok(Self {
            central,
            config,
            publisher,
        })
    }

    /// Scan for `scan_duration_secs` and return the peripherals found.
    ///
    /// # Errors
    ///
    /// Returns [`BleError`] when discovery cannot be started.
    pub async fn scan(&self) -> Result<PeripheralRegistry, BleError> {
        tracing::info!(
            duration_secs = self.config.scan_duration_secs,
            "BLE scan started"
        );
        let registry = scanner::run_scan(&self.central, &self.config, self.publisher.clone()).await?;
        tracing::info!(count = registry.len(), "BLE discovery complete");
        Ok(registry)
    }

    /// Connect to `peripheral` and stream readings until the session ends
    /// or `shutdown` resolves.
    ///
    /// Readings and session lifecycle are reported through the publisher.
    /// Resolving `shutdown` closes the session cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::Session`] when the session cannot be started.
    pub async fn run_session<F>(&self, peripheral: PeripheralHandle, shutdown: F) -> Result<(), BleError>
    where
        F: Future<Output = ()>,
    {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (transport, worker) =
            GattWorker::spawn(self.central.clone(), self.config.connect_timeout(), events_tx);
        let mut negotiator = Negotiator::new(transport, self.publisher.clone());

        negotiator.connect(peripheral)?;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(state = %negotiator.state(), "shutdown requested, closing session");
                    negotiator.close();
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::warn!("GATT worker stopped unexpectedly");
                        negotiator.close();
                        break;
                    };
                    negotiator.handle(event);
                    if negotiator.state() == NegotiationState::Idle {
                        break;
                    }
                }
            }
        }

        drop(negotiator);
        if let Err(err) = worker.await {
            tracing::warn!(%err, "GATT worker task failed");
        }
        Ok(())
    }
}
