//! Peripheral registry: the deduplicated list of discovered peripherals.

use sensortag_domain::id::PeripheralAddress;
use sensortag_domain::peripheral::PeripheralHandle;

/// Ordered set of discovered peripherals, unique by address.
///
/// Insertion order is preserved so positional lookups stay stable while a
/// consumer presents the list for selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralRegistry {
    peripherals: Vec<PeripheralHandle>,
}

impl PeripheralRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handle` unless a peripheral with the same address is
    /// already present. Returns whether it was inserted.
    pub fn add(&mut self, handle: PeripheralHandle) -> bool {
        if self.find(handle.address()).is_some() {
            return false;
        }
        self.peripherals.push(handle);
        true
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.peripherals.clear();
    }

    /// Positional lookup.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PeripheralHandle> {
        self.peripherals.get(index)
    }

    /// Lookup by address.
    #[must_use]
    pub fn find(&self, address: PeripheralAddress) -> Option<&PeripheralHandle> {
        self.peripherals.iter().find(|p| p.address() == address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    /// Iterate in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &PeripheralHandle> {
        self.peripherals.iter()
    }
}
