//! BLE adapter configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for discovery and GATT sessions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// How long a discovery window stays open, in seconds.
    pub scan_duration_secs: u16,
    /// How long to wait for a connection to come up, in seconds.
    pub connect_timeout_secs: u16,
    /// Optional MAC address allowlist (e.g. `["B0:B4:48:C9:0A:82"]`).
    ///
    /// When empty, every discovered peripheral is accepted.
    pub device_filter: Vec<String>,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            scan_duration_secs: 10,
            connect_timeout_secs: 10,
            device_filter: Vec::new(),
        }
    }
}

impl BleConfig {
    #[must_use]
    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.scan_duration_secs))
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.connect_timeout_secs))
    }

    /// Check whether the given MAC address passes the device filter.
    #[must_use]
    pub fn passes_filter(&self, mac: &str) -> bool {
        if self.device_filter.is_empty() {
            return true;
        }
        self.device_filter
            .iter()
            .any(|f| f.eq_ignore_ascii_case(mac))
    }
}
