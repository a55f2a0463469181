//! Sensor payload decoders.
//!
//! Pure functions turning little-endian notification buffers into
//! physical values. The raw decoders assume the caller already checked the
//! buffer length; [`decode`] performs that check and is what the session
//! uses.
//!
//! | Sensor | Bytes | Encoding |
//! |--------|-------|----------|
//! | Illuminance | 0–1 | u16 LE, 12-bit mantissa + exponent in bits 12.., `m·2^e / 100` lux |
//! | Temperature | 2–3 | u16 LE, 7-bit fraction fixed point, `/ 128` °C |

use crate::error::PayloadError;
use crate::profile::SensorKind;
use crate::reading::Measurement;

/// Read an unsigned 16-bit little-endian word at `offset`.
///
/// Bytes are combined as unsigned values; the result is never sign-extended.
///
/// # Panics
///
/// Panics if `buf` holds fewer than `offset + 2` bytes.
#[must_use]
pub fn read_u16le(buf: &[u8], offset: usize) -> u16 {
    let low = u16::from(buf[offset]);
    let high = u16::from(buf[offset + 1]);
    (high << 8) | low
}

/// Decode a light sensor payload into lux.
///
/// The word at offset 0 carries a 12-bit mantissa and the exponent in the
/// bits above it; the lux value is `mantissa * 2^exponent / 100`.
///
/// # Panics
///
/// Panics if `buf` is shorter than 2 bytes.
#[must_use]
pub fn decode_illuminance(buf: &[u8]) -> f64 {
    let word = read_u16le(buf, 0);
    let mantissa = u32::from(word & 0x0FFF);
    let exponent = u32::from((word >> 12) & 0xFF);
    f64::from(mantissa << exponent) / 100.0
}

/// Decode an IR temperature payload into degrees Celsius.
///
/// Only the ambient (die) temperature at bytes 2–3 is decoded; the object
/// temperature at bytes 0–1 is ignored.
///
/// # Panics
///
/// Panics if `buf` is shorter than 4 bytes.
#[must_use]
pub fn decode_temperature(buf: &[u8]) -> f64 {
    f64::from(read_u16le(buf, 2)) / 128.0
}

/// Decode a payload for the given subsystem, validating its length first.
///
/// # Errors
///
/// Returns [`PayloadError::TooShort`] when `buf` is shorter than the
/// subsystem's encoding.
pub fn decode(sensor: SensorKind, buf: &[u8]) -> Result<Measurement, PayloadError> {
    let expected = sensor.min_payload_len();
    if buf.len() < expected {
        return Err(PayloadError::TooShort {
            sensor,
            expected,
            actual: buf.len(),
        });
    }

    Ok(match sensor {
        SensorKind::Illuminance => Measurement::Illuminance {
            lux: decode_illuminance(buf),
        },
        SensorKind::Temperature => Measurement::Temperature {
            celsius: decode_temperature(buf),
        },
    })
}
