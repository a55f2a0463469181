//! # sensortag-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `GattSession`: fire-and-forget GATT commands tagged with a session id
//!   - `DiscoveryPort`: start/stop peripheral discovery
//!   - `SessionEventPublisher`: deliver session events to consumers
//! - Define the **use-case components**:
//!   - `Negotiator`: connection negotiation state machine
//!   - `ScanController`: bounded discovery windows
//!   - `PeripheralRegistry`: deduplicated discovered peripherals
//! - Provide **in-process infrastructure** (event bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `sensortag-domain` only (plus `tokio::sync`/`tokio::time`).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod event_bus;
pub mod negotiation;
pub mod ports;
pub mod registry;
pub mod scan;
pub mod session;
