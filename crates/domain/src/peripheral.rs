//! Peripheral: a discovered remote sensor device.

use serde::{Deserialize, Serialize};

use crate::id::PeripheralAddress;

/// Name shown for peripherals that do not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// A discovered peripheral.
///
/// Identity is the transport-assigned [`PeripheralAddress`]; the name is
/// informational only. Handles are immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralHandle {
    address: PeripheralAddress,
    name: Option<String>,
}

impl PeripheralHandle {
    #[must_use]
    pub fn new(address: PeripheralAddress, name: Option<String>) -> Self {
        Self { address, name }
    }

    #[must_use]
    pub fn address(&self) -> PeripheralAddress {
        self.address
    }

    /// Advertised local name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for display, falling back to [`UNKNOWN_DEVICE_NAME`] when the
    /// peripheral advertises no name or an empty one.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}
