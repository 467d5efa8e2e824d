//! Beacon primitives and per-beacon state tracking.
//!
//! This module provides:
//! - [`BeaconIdentity`] - immutable UUID/major/minor identity used as a map key
//! - [`ProximityLevel`] and [`SignalQuality`] - RSSI-derived classifications
//! - [`BeaconEvent`] - everything the sensor layer can emit
//! - [`BeaconStatus`] - the per-beacon state machine driven by those events

mod event;
mod identity;
mod proximity;
mod status;

pub use event::{AuthorizationStatus, BeaconEvent, RecordedEvent};
pub use identity::{BeaconDevice, BeaconIdentity, BeaconRegion, IdentityParseError};
pub use proximity::{ProximityCalibration, ProximityLevel, ProximitySample, SignalQuality};
pub use status::{BeaconStatus, RangeTransition, EVENT_HISTORY_LIMIT};
