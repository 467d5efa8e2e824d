//! User-defined blocking rules.
//!
//! Rules are owned by the persistence collaborator and handed to the engine as
//! read-only input. A rule blocks its resources when its GPS, time and beacon
//! conditions all hold; see [`crate::strategy`] for how they are evaluated.

mod schedule;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

pub use schedule::{Recurrence, TimeOfDay, TimeRule};

use crate::beacon::BeaconIdentity;
use crate::geo::{self, Location};

/// Rule identifier.
pub type RuleId = Uuid;

/// Resource identifiers look like bundle ids or opaque tokens: `com.example.app`.
static RESOURCE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:\-]{0,254}$").expect("resource id pattern is valid")
});

/// Returns `true` if `id` is a syntactically valid blocked-resource identifier.
#[must_use]
pub fn is_valid_resource_id(id: &str) -> bool {
    RESOURCE_ID_PATTERN.is_match(id)
}

/// Circular GPS geofence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GpsLocation {
    /// Center latitude in decimal degrees.
    pub latitude: f64,

    /// Center longitude in decimal degrees.
    pub longitude: f64,

    /// Radius in meters.
    pub radius_meters: f64,

    /// Inactive geofences impose no condition.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl GpsLocation {
    /// Distance from the geofence center to `location`, in meters.
    #[must_use]
    pub fn distance_to(&self, location: &Location) -> f64 {
        geo::haversine_distance(
            self.latitude,
            self.longitude,
            location.latitude,
            location.longitude,
        )
    }

    /// Whether `location` lies on or inside the boundary.
    #[must_use]
    pub fn contains(&self, location: &Location) -> bool {
        self.distance_to(location) <= self.radius_meters
    }
}

/// What being near a beacon means for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BeaconBehavior {
    /// Resources are allowed near the beacon and blocked away from it.
    AllowedIn,
    /// Resources are blocked near the beacon and allowed away from it.
    BlockedIn,
}

impl BeaconBehavior {
    /// Whether the beacon condition blocks, given whether the beacon counts as present.
    #[must_use]
    pub const fn blocks_when(self, beacon_present: bool) -> bool {
        match self {
            Self::AllowedIn => !beacon_present,
            Self::BlockedIn => beacon_present,
        }
    }
}

/// Binds one beacon to a behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FineLocationRule {
    /// Identifier.
    pub id: Uuid,

    /// The beacon this rule refers to.
    pub beacon: BeaconIdentity,

    /// Allow-when-near or block-when-near.
    pub behavior: BeaconBehavior,

    /// Inactive fine-location rules are ignored.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// A user-defined blocking rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Rule {
    /// Identifier.
    #[schema(value_type = String, format = Uuid)]
    pub id: RuleId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Inactive rules never block.
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Optional geofence.
    #[serde(default)]
    pub gps_location: Option<GpsLocation>,

    /// Time windows; any active one matching is enough.
    #[serde(default)]
    pub time_rules: Vec<TimeRule>,

    /// Beacon conditions, evaluated in order; the first usable one decides.
    #[serde(default)]
    pub fine_location_rules: Vec<FineLocationRule>,

    /// Resources blocked while this rule blocks.
    #[serde(default)]
    pub blocked_resource_ids: Vec<String>,
}

const fn default_active() -> bool {
    true
}

/// A rule failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule {rule_id}: {message}")]
pub struct RuleValidationError {
    /// The offending rule.
    pub rule_id: RuleId,
    /// What is wrong.
    pub message: String,
}

impl Rule {
    /// Active geofence, if any.
    #[must_use]
    pub fn active_gps_location(&self) -> Option<&GpsLocation> {
        self.gps_location.as_ref().filter(|gps| gps.is_active)
    }

    /// Active fine-location rules in declaration order.
    pub fn active_fine_location_rules(&self) -> impl Iterator<Item = &FineLocationRule> {
        self.fine_location_rules.iter().filter(|flr| flr.is_active)
    }

    /// Whether this rule can ever contribute blocked resources.
    #[must_use]
    pub fn can_block(&self) -> bool {
        self.is_active && !self.blocked_resource_ids.is_empty()
    }

    /// Check structural validity.
    ///
    /// Evaluation tolerates invalid rules; this is for callers that want to
    /// reject bad input up front.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        let fail = |message: String| RuleValidationError {
            rule_id: self.id,
            message,
        };

        if let Some(gps) = &self.gps_location {
            if !geo::is_valid_coordinate(gps.latitude, gps.longitude) {
                return Err(fail(format!(
                    "geofence center ({}, {}) is not a valid coordinate",
                    gps.latitude, gps.longitude
                )));
            }
            if !(gps.radius_meters.is_finite() && gps.radius_meters > 0.0) {
                return Err(fail(format!(
                    "geofence radius must be positive (got {})",
                    gps.radius_meters
                )));
            }
        }

        if let Some(problem) = self.time_rules.iter().find_map(TimeRule::problem) {
            return Err(fail(problem));
        }

        if let Some(bad) = self
            .blocked_resource_ids
            .iter()
            .find(|id| !is_valid_resource_id(id))
        {
            return Err(fail(format!("invalid blocked resource id '{bad}'")));
        }

        Ok(())
    }
}
