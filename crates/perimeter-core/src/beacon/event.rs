//! Events emitted by the sensor layer.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::identity::BeaconIdentity;
use super::proximity::ProximityLevel;

/// Location/ranging authorization reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// The user has not been asked yet.
    NotDetermined,
    /// Restricted by policy.
    Restricted,
    /// The user refused.
    Denied,
    /// Granted while the app is in use only.
    AuthorizedWhenInUse,
    /// Granted in the background too.
    AuthorizedAlways,
}

impl AuthorizationStatus {
    /// Whether beacon monitoring can run at all.
    #[must_use]
    pub const fn allows_monitoring(self) -> bool {
        matches!(self, Self::AuthorizedAlways | Self::AuthorizedWhenInUse)
    }
}

/// Everything the sensor layer can report.
///
/// Beacon-specific variants carry exactly one [`BeaconIdentity`]; the last
/// four variants are system-level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BeaconEvent {
    /// A ranging sample with a valid RSSI.
    Detected {
        /// The beacon.
        beacon: BeaconIdentity,
        /// Signal strength in dBm.
        rssi: i32,
    },

    /// Ranging no longer sees the beacon.
    Lost {
        /// The beacon.
        beacon: BeaconIdentity,
    },

    /// The beacon's monitored region was entered.
    RegionEntered {
        /// The beacon.
        beacon: BeaconIdentity,
    },

    /// The beacon's monitored region was exited.
    RegionExited {
        /// The beacon.
        beacon: BeaconIdentity,
    },

    /// The platform already classified proximity.
    ProximityChanged {
        /// The beacon.
        beacon: BeaconIdentity,
        /// Classified proximity.
        proximity: ProximityLevel,
    },

    /// No beacon matched a ranging constraint.
    NoBeacon {
        /// Description of the constraint that came up empty.
        constraint: String,
    },

    /// The beacon reported an invalid (zero) RSSI.
    MissingBeacon {
        /// The beacon.
        beacon: BeaconIdentity,
    },

    /// Monitoring started for the given beacons.
    MonitoringStarted {
        /// Monitored beacons.
        beacons: BTreeSet<BeaconIdentity>,
    },

    /// Monitoring stopped.
    MonitoringStopped,

    /// Authorization changed.
    AuthorizationChanged {
        /// New status.
        status: AuthorizationStatus,
    },

    /// The sensor layer failed.
    Error {
        /// Failure description.
        reason: String,
    },
}

impl BeaconEvent {
    /// Build the event for a raw ranging sample.
    ///
    /// An RSSI of `0` is the invalid-reading sentinel and becomes
    /// [`BeaconEvent::MissingBeacon`] rather than a detection.
    #[must_use]
    pub const fn from_ranging(beacon: BeaconIdentity, rssi: i32) -> Self {
        if rssi == 0 {
            Self::MissingBeacon { beacon }
        } else {
            Self::Detected { beacon, rssi }
        }
    }

    /// The beacon this event is about, if it is beacon-specific.
    #[must_use]
    pub const fn beacon(&self) -> Option<BeaconIdentity> {
        match self {
            Self::Detected { beacon, .. }
            | Self::Lost { beacon }
            | Self::RegionEntered { beacon }
            | Self::RegionExited { beacon }
            | Self::ProximityChanged { beacon, .. }
            | Self::MissingBeacon { beacon } => Some(*beacon),
            Self::NoBeacon { .. }
            | Self::MonitoringStarted { .. }
            | Self::MonitoringStopped
            | Self::AuthorizationChanged { .. }
            | Self::Error { .. } => None,
        }
    }

    /// Returns `true` for events that do not concern a single beacon.
    #[must_use]
    pub const fn is_system_event(&self) -> bool {
        self.beacon().is_none()
    }

    /// Replace a zero-RSSI detection with [`BeaconEvent::MissingBeacon`].
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Detected { beacon, rssi: 0 } => Self::MissingBeacon { beacon },
            other => other,
        }
    }

    /// Short, stable name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Detected { .. } => "detected",
            Self::Lost { .. } => "lost",
            Self::RegionEntered { .. } => "region_entered",
            Self::RegionExited { .. } => "region_exited",
            Self::ProximityChanged { .. } => "proximity_changed",
            Self::NoBeacon { .. } => "no_beacon",
            Self::MissingBeacon { .. } => "missing_beacon",
            Self::MonitoringStarted { .. } => "monitoring_started",
            Self::MonitoringStopped => "monitoring_stopped",
            Self::AuthorizationChanged { .. } => "authorization_changed",
            Self::Error { .. } => "error",
        }
    }
}

/// An event as stored in a bounded history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordedEvent {
    /// The event, verbatim.
    pub event: BeaconEvent,

    /// When it was applied.
    pub recorded_at: DateTime<Utc>,

    /// Whether the beacon was in range after applying it.
    pub in_range_after: bool,
}
