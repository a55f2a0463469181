//! Discovery port: start/stop receiving peripheral discovery events.

use std::future::Future;

use sensortag_domain::error::TransportError;

/// Controls the radio's discovery (scan) mode.
///
/// Discovered peripherals are delivered out-of-band by the adapter; this
/// port only switches discovery on and off.
pub trait DiscoveryPort {
    /// Begin receiving discovery events.
    fn start_discovery(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stop receiving discovery events.
    fn stop_discovery(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
