//! Beacon identity and the platform region adapter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Immutable identity of a physical beacon.
///
/// Two beacons are the same beacon iff UUID, major and minor all match.
/// The textual form is `UUID:major:minor`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[schema(example = json!({
    "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "major": 100,
    "minor": 7
}))]
pub struct BeaconIdentity {
    /// Proximity UUID broadcast by the beacon.
    pub uuid: Uuid,

    /// Major value, usually a site or floor.
    pub major: u16,

    /// Minor value, usually a single beacon within the site.
    pub minor: u16,
}

impl BeaconIdentity {
    /// Create a new identity.
    #[must_use]
    pub const fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self { uuid, major, minor }
    }

    /// Identifier used when registering a monitored region for this beacon.
    #[must_use]
    pub fn region_identifier(&self) -> String {
        format!("perimeter.{self}")
    }
}

impl fmt::Display for BeaconIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.uuid.as_hyphenated().to_string().to_uppercase(),
            self.major,
            self.minor
        )
    }
}

/// Error returned when a beacon identity cannot be parsed or converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid beacon identity '{input}': {reason}")]
pub struct IdentityParseError {
    input: String,
    reason: &'static str,
}

impl IdentityParseError {
    const fn new(input: String, reason: &'static str) -> Self {
        Self { input, reason }
    }

    /// The text that failed to parse.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Why it failed.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        self.reason
    }
}

impl FromStr for BeaconIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let (Some(uuid), Some(major), Some(minor), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdentityParseError::new(
                s.to_string(),
                "expected exactly three ':'-separated parts",
            ));
        };

        let uuid = Uuid::parse_str(uuid)
            .map_err(|_| IdentityParseError::new(s.to_string(), "UUID is malformed"))?;
        let major = major
            .parse()
            .map_err(|_| IdentityParseError::new(s.to_string(), "major must be 0-65535"))?;
        let minor = minor
            .parse()
            .map_err(|_| IdentityParseError::new(s.to_string(), "minor must be 0-65535"))?;

        Ok(Self::new(uuid, major, minor))
    }
}

/// Metadata about a registered beacon device.
///
/// Owned by the device list collaborator; replaceable without touching
/// the tracked signal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BeaconDevice {
    /// Human-readable name.
    #[schema(example = "Desk beacon")]
    pub name: String,

    /// Where the beacon is placed, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "Office")]
    pub placement: Option<String>,
}

impl BeaconDevice {
    /// Create device metadata with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            placement: None,
        }
    }
}

/// A monitored region as the sensor subsystem describes it.
///
/// Unlike [`BeaconIdentity`], major and minor may be wildcards, in which case
/// the region covers every beacon sharing the UUID (and major).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BeaconRegion {
    /// Identifier the region was registered under.
    pub identifier: String,

    /// Proximity UUID.
    pub uuid: Uuid,

    /// Major value, `None` matches any.
    pub major: Option<u16>,

    /// Minor value, `None` matches any.
    pub minor: Option<u16>,
}

impl BeaconRegion {
    /// Returns `true` if the given beacon falls within this region.
    #[must_use]
    pub fn contains(&self, identity: &BeaconIdentity) -> bool {
        self.uuid == identity.uuid
            && self.major.map_or(true, |major| major == identity.major)
            && self.minor.map_or(true, |minor| minor == identity.minor)
    }
}

impl From<BeaconIdentity> for BeaconRegion {
    fn from(identity: BeaconIdentity) -> Self {
        Self {
            identifier: identity.region_identifier(),
            uuid: identity.uuid,
            major: Some(identity.major),
            minor: Some(identity.minor),
        }
    }
}

impl TryFrom<&BeaconRegion> for BeaconIdentity {
    type Error = IdentityParseError;

    fn try_from(region: &BeaconRegion) -> Result<Self, Self::Error> {
        match (region.major, region.minor) {
            (Some(major), Some(minor)) => Ok(Self::new(region.uuid, major, minor)),
            _ => Err(IdentityParseError::new(
                region.identifier.clone(),
                "region uses a major/minor wildcard",
            )),
        }
    }
}
