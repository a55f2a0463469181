//! Typed identifiers: peripheral addresses and session generations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport-assigned 6-byte address identifying a peripheral.
///
/// Formats as upper-case colon-separated hex (`A4:C1:38:5B:0E:DF`) and
/// serialises as that string.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeripheralAddress([u8; 6]);

impl PeripheralAddress {
    /// Wrap raw address bytes, most significant first.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Access the raw address bytes.
    #[must_use]
    pub const fn into_inner(self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Error returned when a string is not a colon-separated 6-byte address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid peripheral address {0:?}")]
pub struct ParseAddressError(String);

impl FromStr for PeripheralAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParseAddressError(s.to_owned()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseAddressError(s.to_owned()))?;
        }
        if parts.next().is_some() {
            return Err(ParseAddressError(s.to_owned()));
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for PeripheralAddress {
    type Error = ParseAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeripheralAddress> for String {
    fn from(address: PeripheralAddress) -> Self {
        address.to_string()
    }
}

/// Generation number of a negotiation session.
///
/// Every transport command and event is tagged with the session it belongs
/// to, so completions arriving after a teardown can be recognised and
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// The first generation handed out by a fresh state machine.
    pub const FIRST: Self = Self(1);

    /// The generation following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw generation number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
