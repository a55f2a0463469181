//! Scan controller: bounded discovery windows feeding the registry.
//!
//! Only one window is open at a time. Opening a window clears the registry
//! and records a deadline; the driver waits on [`ScanController::deadline`]
//! and calls [`ScanController::stop_if_expired`] to close it.

use std::time::Duration;

use tokio::time::Instant;

use sensortag_domain::error::SessionError;
use sensortag_domain::peripheral::PeripheralHandle;

use crate::ports::{DiscoveryPort, SessionEvent, SessionEventPublisher};
use crate::registry::PeripheralRegistry;

/// Default length of a discovery window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Starts and stops discovery and collects what it finds.
pub struct ScanController<D, P> {
    discovery: D,
    publisher: P,
    registry: PeripheralRegistry,
    deadline: Option<Instant>,
}

impl<D: DiscoveryPort, P: SessionEventPublisher> ScanController<D, P> {
    #[must_use]
    pub fn new(discovery: D, publisher: P) -> Self {
        Self {
            discovery,
            publisher,
            registry: PeripheralRegistry::new(),
            deadline: None,
        }
    }

    /// Open a discovery window of length `window`.
    ///
    /// Returns `false` without touching discovery if a window is already
    /// open.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportUnavailable`] when discovery cannot
    /// be started; the controller stays stopped.
    pub async fn start(&mut self, window: Duration) -> Result<bool, SessionError> {
        if self.is_scanning() {
            tracing::debug!("scan already running, ignoring start");
            return Ok(false);
        }

        self.registry.clear();
        self.discovery.start_discovery().await?;
        self.deadline = Some(Instant::now() + window);

        tracing::info!(window_secs = window.as_secs(), "scan started");
        Ok(true)
    }

    /// Close the discovery window. No-op when not scanning.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportUnavailable`] when discovery cannot
    /// be stopped. The controller is considered stopped either way.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        if self.deadline.take().is_none() {
            return Ok(());
        }

        let result = self.discovery.stop_discovery().await;
        tracing::info!(found = self.registry.len(), "scan stopped");
        self.publisher.publish(SessionEvent::ScanStopped);
        result.map_err(SessionError::from)
    }

    /// Close the window if its deadline has passed. Returns whether it was
    /// closed by this call.
    ///
    /// # Errors
    ///
    /// See [`stop`](Self::stop).
    pub async fn stop_if_expired(&mut self) -> Result<bool, SessionError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.stop().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Record a discovered peripheral. Ignored when no window is open.
    ///
    /// Returns whether the peripheral was new to this window.
    pub fn on_found(&mut self, handle: PeripheralHandle) -> bool {
        if !self.is_scanning() {
            tracing::trace!(address = %handle.address(), "discovery event outside scan window");
            return false;
        }
        if !self.registry.add(handle.clone()) {
            return false;
        }

        tracing::debug!(
            address = %handle.address(),
            name = handle.display_name(),
            "peripheral discovered"
        );
        self.publisher
            .publish(SessionEvent::PeripheralDiscovered(handle));
        true
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the open window closes, if one is open.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn registry(&self) -> &PeripheralRegistry {
        &self.registry
    }

    /// Consume the controller, keeping what the last window found.
    #[must_use]
    pub fn into_registry(self) -> PeripheralRegistry {
        self.registry
    }
}
