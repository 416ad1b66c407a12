//! Type-safe device identifier.
//!
//! [`DeviceId`] wraps the externally assigned identifier a device presents
//! when it opens its relay connection. Relay connections accept any
//! non-empty id; the HTTP notify and claim endpoints additionally require
//! the canonical hardware form (see [`DeviceId::is_canonical`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix shared by all canonical hardware identifiers.
const CANONICAL_PREFIX: &str = "BRW-";

/// Number of uppercase hex digits after [`CANONICAL_PREFIX`].
const CANONICAL_HEX_LEN: usize = 8;

/// Identifier of an embedded device.
///
/// Stable for the life of the hardware. Used as the key of the device
/// registry, the reverse index of the client registry, and the target of
/// push subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Parses a raw identifier. Surrounding whitespace is trimmed; an empty
    /// result is rejected.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    /// Parses a raw identifier and requires the canonical hardware form.
    #[must_use]
    pub fn parse_canonical(raw: &str) -> Option<Self> {
        Self::parse(raw).filter(Self::is_canonical)
    }

    /// Returns `true` if the id has the form `BRW-XXXXXXXX` with eight
    /// uppercase hex digits.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.0.strip_prefix(CANONICAL_PREFIX).is_some_and(|hex| {
            hex.len() == CANONICAL_HEX_LEN
                && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'A'..=b'F'))
        })
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_blank() {
        assert!(DeviceId::parse("").is_none());
        assert!(DeviceId::parse("   ").is_none());
    }

    #[test]
    fn parse_trims() {
        let Some(id) = DeviceId::parse("  dev-1 ") else {
            panic!("expected id");
        };
        assert_eq!(id.as_str(), "dev-1");
    }

    #[test]
    fn canonical_pattern() {
        assert!(DeviceId::parse_canonical("BRW-AABBCCDD").is_some());
        assert!(DeviceId::parse_canonical("BRW-0123ABCD").is_some());
        assert!(DeviceId::parse_canonical("BRW-aabbccdd").is_none());
        assert!(DeviceId::parse_canonical("BRW-AABBCCD").is_none());
        assert!(DeviceId::parse_canonical("BRW-AABBCCDDE").is_none());
        assert!(DeviceId::parse_canonical("XYZ-AABBCCDD").is_none());
        assert!(DeviceId::parse_canonical("BRW-GGBBCCDD").is_none());
    }

    #[test]
    fn serde_is_transparent() {
        let Some(id) = DeviceId::parse("BRW-AABBCCDD") else {
            panic!("expected id");
        };
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"BRW-AABBCCDD\"");
    }
}
