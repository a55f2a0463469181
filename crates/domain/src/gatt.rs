//! GATT table model: what a peripheral exposes after service discovery.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Completion status reported by the peripheral for a GATT operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(u16);

impl GattStatus {
    /// Operation completed successfully.
    pub const SUCCESS: Self = Self(0x0000);
    /// Generic failure (no more specific status available).
    pub const FAILURE: Self = Self(0x0101);

    /// Wrap a raw status code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Whether the operation succeeded.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Raw status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// A discovered characteristic and the descriptors attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    #[must_use]
    pub fn new(uuid: Uuid, descriptors: Vec<Uuid>) -> Self {
        Self { uuid, descriptors }
    }

    /// Whether a descriptor with the given UUID is attached.
    #[must_use]
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

/// A discovered service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    #[must_use]
    pub fn new(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    /// Find a characteristic of this service by UUID.
    #[must_use]
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// All services discovered on a peripheral.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattTable {
    services: Vec<GattService>,
}

impl GattTable {
    #[must_use]
    pub fn new(services: Vec<GattService>) -> Self {
        Self { services }
    }

    /// Find a service by UUID.
    #[must_use]
    pub fn service(&self, uuid: Uuid) -> Option<&GattService> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    /// Discovered services, in discovery order.
    #[must_use]
    pub fn services(&self) -> &[GattService] {
        &self.services
    }
}

impl FromIterator<GattService> for GattTable {
    fn from_iter<I: IntoIterator<Item = GattService>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
