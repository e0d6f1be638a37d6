//! Semantic firmware version triple.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("expected major.minor.patch, got {0:?}")]
    Format(String),
    #[error("version component {component:?} is not a number in 0..=255")]
    Component { component: String },
}

/// `(major, minor, patch)` as embedded in an image or reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FirmwareVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError::Format(s.to_string()));
        }
        let component = |p: &str| {
            p.parse::<u8>().map_err(|_| VersionParseError::Component {
                component: p.to_string(),
            })
        };
        Ok(Self {
            major: component(parts[0])?,
            minor: component(parts[1])?,
            patch: component(parts[2])?,
        })
    }
}

impl Serialize for FirmwareVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FirmwareVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: FirmwareVersion = "1.0.5".parse().unwrap();
        assert_eq!(v, FirmwareVersion::new(1, 0, 5));
        assert_eq!(v.to_string(), "1.0.5");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            "1.0".parse::<FirmwareVersion>(),
            Err(VersionParseError::Format(_))
        ));
        assert!(matches!(
            "1.x.0".parse::<FirmwareVersion>(),
            Err(VersionParseError::Component { .. })
        ));
        assert!("1.256.0".parse::<FirmwareVersion>().is_err());
    }
}
