//! SensorTag GATT profile constants.
//!
//! Wire-format identifiers and values that must match the peripheral
//! firmware bit-exactly.
//!
//! | Subsystem | Service | Data | Configuration |
//! |-----------|---------|------|---------------|
//! | Illuminance | `f000aa70-…` | `f000aa71-…` | `f000aa72-…` |
//! | IR temperature | `f000aa00-…` | `f000aa01-…` | `f000aa02-…` |

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard client characteristic configuration descriptor (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);

/// Light sensor (OPT3001) service.
pub const LIGHT_SENSOR_SERVICE: Uuid = Uuid::from_u128(0xf000_aa70_0451_4000_b000_0000_0000_0000);
/// Light sensor data characteristic (2-byte notification payload).
pub const LIGHT_SENSOR_DATA: Uuid = Uuid::from_u128(0xf000_aa71_0451_4000_b000_0000_0000_0000);
/// Light sensor configuration characteristic (write [`SENSOR_ON`] to enable).
pub const LIGHT_SENSOR_CONFIG: Uuid = Uuid::from_u128(0xf000_aa72_0451_4000_b000_0000_0000_0000);

/// IR temperature sensor service.
pub const IR_TEMP_SERVICE: Uuid = Uuid::from_u128(0xf000_aa00_0451_4000_b000_0000_0000_0000);
/// IR temperature data characteristic (4-byte notification payload).
pub const IR_TEMP_DATA: Uuid = Uuid::from_u128(0xf000_aa01_0451_4000_b000_0000_0000_0000);
/// IR temperature configuration characteristic (write [`SENSOR_ON`] to enable).
pub const IR_TEMP_CONFIG: Uuid = Uuid::from_u128(0xf000_aa02_0451_4000_b000_0000_0000_0000);

/// Value written to a CCCD to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Value written to a configuration characteristic to switch the sensor on.
pub const SENSOR_ON: [u8; 1] = [0x01];

/// One of the two sensor subsystems the client negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Ambient light, reported in lux.
    Illuminance,
    /// Ambient (die) temperature from the IR temperature service.
    Temperature,
}

impl SensorKind {
    /// Both subsystems, in negotiation order.
    pub const ALL: [Self; 2] = [Self::Illuminance, Self::Temperature];

    /// Service grouping this subsystem's characteristics.
    #[must_use]
    pub const fn service(self) -> Uuid {
        match self {
            Self::Illuminance => LIGHT_SENSOR_SERVICE,
            Self::Temperature => IR_TEMP_SERVICE,
        }
    }

    /// Notifiable data characteristic.
    #[must_use]
    pub const fn data_characteristic(self) -> Uuid {
        match self {
            Self::Illuminance => LIGHT_SENSOR_DATA,
            Self::Temperature => IR_TEMP_DATA,
        }
    }

    /// Enable/disable configuration characteristic.
    #[must_use]
    pub const fn config_characteristic(self) -> Uuid {
        match self {
            Self::Illuminance => LIGHT_SENSOR_CONFIG,
            Self::Temperature => IR_TEMP_CONFIG,
        }
    }

    /// Minimum number of payload bytes the codec needs for this subsystem.
    #[must_use]
    pub const fn min_payload_len(self) -> usize {
        match self {
            Self::Illuminance => 2,
            Self::Temperature => 4,
        }
    }

    /// Identify the subsystem owning a data characteristic.
    #[must_use]
    pub fn from_data_characteristic(uuid: Uuid) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.data_characteristic() == uuid)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Illuminance => f.write_str("illuminance"),
            Self::Temperature => f.write_str("temperature"),
        }
    }
}
