//! Sensor readings: decoded values handed to consumers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::SensorKind;

/// A decoded physical quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    /// Ambient light in lux.
    Illuminance { lux: f64 },
    /// Ambient temperature in degrees Celsius.
    Temperature { celsius: f64 },
}

impl Measurement {
    /// Subsystem this measurement comes from.
    #[must_use]
    pub fn sensor(&self) -> SensorKind {
        match self {
            Self::Illuminance { .. } => SensorKind::Illuminance,
            Self::Temperature { .. } => SensorKind::Temperature,
        }
    }

    /// The numeric value in the measurement's unit.
    #[must_use]
    pub fn value(&self) -> f64 {
        match *self {
            Self::Illuminance { lux } => lux,
            Self::Temperature { celsius } => celsius,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Illuminance { lux } => write!(f, "{lux} lux"),
            Self::Temperature { celsius } => write!(f, "{celsius} \u{b0}C"),
        }
    }
}

/// One decoded notification, tagged with the characteristic it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub characteristic: Uuid,
    pub measurement: Measurement,
}

impl SensorReading {
    #[must_use]
    pub fn new(characteristic: Uuid, measurement: Measurement) -> Self {
        Self {
            characteristic,
            measurement,
        }
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.measurement.fmt(f)
    }
}
