//! Per-beacon state machine.
//!
//! A [`BeaconStatus`] is created when a beacon is registered and is only ever
//! mutated through [`BeaconStatus::update_from_event`]. It tracks proximity,
//! the current and smoothed RSSI, region membership, detection counters and a
//! bounded history of the events applied to it.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::event::{BeaconEvent, RecordedEvent};
use super::identity::{BeaconDevice, BeaconIdentity};
use super::proximity::{ProximityCalibration, ProximityLevel, ProximitySample, SignalQuality};
use crate::clock::{elapsed_between, has_elapsed};

/// Number of events kept in each beacon's history.
pub const EVENT_HISTORY_LIMIT: usize = 50;

/// How a single event changed a beacon's range membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeTransition {
    /// Proximity before the event.
    pub proximity_before: ProximityLevel,
    /// Proximity after the event.
    pub proximity_after: ProximityLevel,
    /// In range before the event.
    pub was_in_range: bool,
    /// In range after the event.
    pub is_in_range: bool,
}

impl RangeTransition {
    /// Returns `true` if range membership flipped.
    #[must_use]
    pub const fn range_changed(&self) -> bool {
        self.was_in_range != self.is_in_range
    }
}

/// Tracked state of one beacon.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BeaconStatus {
    identity: BeaconIdentity,
    device: BeaconDevice,
    #[serde(skip)]
    calibration: ProximityCalibration,

    proximity: ProximityLevel,
    current_rssi: Option<i32>,
    smoothed_rssi: Option<f64>,
    is_in_region: bool,

    first_seen: DateTime<Utc>,
    last_seen: Option<DateTime<Utc>>,
    last_entered_range_at: Option<DateTime<Utc>>,
    last_region_entry: Option<DateTime<Utc>>,
    last_region_exit: Option<DateTime<Utc>>,

    consecutive_detections: u32,
    total_detections: u64,
    region_entry_count: u64,

    #[schema(value_type = Vec<RecordedEvent>)]
    recent_events: VecDeque<RecordedEvent>,
    #[serde(skip)]
    history_truncated: bool,
}

impl BeaconStatus {
    /// Create the status for a newly registered beacon.
    #[must_use]
    pub fn new(
        identity: BeaconIdentity,
        device: BeaconDevice,
        calibration: ProximityCalibration,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            device,
            calibration,
            proximity: ProximityLevel::Unknown,
            current_rssi: None,
            smoothed_rssi: None,
            is_in_region: false,
            first_seen: registered_at,
            last_seen: None,
            last_entered_range_at: None,
            last_region_entry: None,
            last_region_exit: None,
            consecutive_detections: 0,
            total_detections: 0,
            region_entry_count: 0,
            recent_events: VecDeque::with_capacity(EVENT_HISTORY_LIMIT),
            history_truncated: false,
        }
    }

    /// Apply one beacon-specific event.
    ///
    /// System-level events are ignored and leave no trace in the history.
    pub fn update_from_event(&mut self, event: &BeaconEvent, now: DateTime<Utc>) -> RangeTransition {
        let proximity_before = self.proximity;
        let was_in_range = self.is_in_range();

        match *event {
            BeaconEvent::Detected { rssi, .. } => {
                self.current_rssi = Some(rssi);
                self.total_detections += 1;
                self.consecutive_detections = self.consecutive_detections.saturating_add(1);
                self.smoothed_rssi = Some(self.calibration.smooth(self.smoothed_rssi, rssi));
                self.proximity = ProximityLevel::classify(rssi, &self.calibration);
            }
            BeaconEvent::RegionEntered { .. } => {
                self.region_entry_count += 1;
                self.is_in_region = true;
                self.last_region_entry = Some(now);
                self.proximity = self.proximity.max(ProximityLevel::Near);
            }
            BeaconEvent::RegionExited { .. } => {
                self.consecutive_detections = 0;
                self.is_in_region = false;
                self.last_region_exit = Some(now);
                self.current_rssi = None;
                self.proximity = ProximityLevel::Unknown;
            }
            BeaconEvent::Lost { .. } => {
                self.consecutive_detections = 0;
                self.current_rssi = None;
                self.proximity = ProximityLevel::Unknown;
            }
            BeaconEvent::ProximityChanged { proximity, .. } => {
                self.proximity = proximity;
            }
            BeaconEvent::MissingBeacon { .. } => {
                // Corrupt sample: drop the reading but keep the last known proximity.
                self.current_rssi = None;
            }
            BeaconEvent::NoBeacon { .. }
            | BeaconEvent::MonitoringStarted { .. }
            | BeaconEvent::MonitoringStopped
            | BeaconEvent::AuthorizationChanged { .. }
            | BeaconEvent::Error { .. } => {
                return RangeTransition {
                    proximity_before,
                    proximity_after: proximity_before,
                    was_in_range,
                    is_in_range: was_in_range,
                };
            }
        }

        let is_in_range = self.is_in_range();
        if is_in_range && !was_in_range {
            self.last_entered_range_at = Some(now);
        }
        self.last_seen = Some(now);
        self.record(event.clone(), now, is_in_range);

        RangeTransition {
            proximity_before,
            proximity_after: self.proximity,
            was_in_range,
            is_in_range,
        }
    }

    /// Replace the device metadata, keeping all tracked state.
    pub fn set_device(&mut self, device: BeaconDevice) {
        self.device = device;
    }

    fn record(&mut self, event: BeaconEvent, recorded_at: DateTime<Utc>, in_range_after: bool) {
        if self.recent_events.len() == EVENT_HISTORY_LIMIT {
            self.recent_events.pop_front();
            self.history_truncated = true;
        }
        self.recent_events.push_back(RecordedEvent {
            event,
            recorded_at,
            in_range_after,
        });
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The beacon's identity.
    #[must_use]
    pub const fn identity(&self) -> BeaconIdentity {
        self.identity
    }

    /// Device metadata.
    #[must_use]
    pub const fn device(&self) -> &BeaconDevice {
        &self.device
    }

    /// Current proximity classification.
    #[must_use]
    pub const fn proximity(&self) -> ProximityLevel {
        self.proximity
    }

    /// Latest valid RSSI; cleared on loss, region exit and invalid readings.
    #[must_use]
    pub const fn current_rssi(&self) -> Option<i32> {
        self.current_rssi
    }

    /// Exponential moving average of RSSI.
    #[must_use]
    pub const fn smoothed_rssi(&self) -> Option<f64> {
        self.smoothed_rssi
    }

    /// Whether the beacon's monitored region is currently entered.
    #[must_use]
    pub const fn is_in_region(&self) -> bool {
        self.is_in_region
    }

    /// When the beacon was registered.
    #[must_use]
    pub const fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// When the last beacon-specific event was applied.
    #[must_use]
    pub const fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// When the beacon last moved into range.
    #[must_use]
    pub const fn last_entered_range_at(&self) -> Option<DateTime<Utc>> {
        self.last_entered_range_at
    }

    /// When the region was last entered.
    #[must_use]
    pub const fn last_region_entry(&self) -> Option<DateTime<Utc>> {
        self.last_region_entry
    }

    /// When the region was last exited.
    #[must_use]
    pub const fn last_region_exit(&self) -> Option<DateTime<Utc>> {
        self.last_region_exit
    }

    /// Detections since the last loss or exit.
    #[must_use]
    pub const fn consecutive_detections(&self) -> u32 {
        self.consecutive_detections
    }

    /// Detections since registration.
    #[must_use]
    pub const fn total_detections(&self) -> u64 {
        self.total_detections
    }

    /// Region entries since registration.
    #[must_use]
    pub const fn region_entry_count(&self) -> u64 {
        self.region_entry_count
    }

    /// Up to [`EVENT_HISTORY_LIMIT`] most recent events, oldest first.
    #[must_use]
    pub const fn recent_events(&self) -> &VecDeque<RecordedEvent> {
        &self.recent_events
    }

    // -------------------------------------------------------------------------
    // Derived state
    // -------------------------------------------------------------------------

    /// Whether the beacon is in range. Pure function of proximity and RSSI.
    #[must_use]
    pub fn is_in_range(&self) -> bool {
        self.calibration.is_in_range(self.proximity, self.current_rssi)
    }

    /// Whether the beacon is in near range. Implies [`Self::is_in_range`].
    #[must_use]
    pub const fn is_near_range(&self) -> bool {
        ProximityCalibration::is_near_range(self.proximity)
    }

    /// Signal quality; `Poor` without a current reading.
    #[must_use]
    pub fn signal_quality(&self) -> SignalQuality {
        match self.current_rssi {
            Some(rssi) => {
                SignalQuality::from_readings(rssi, self.smoothed_rssi.unwrap_or(f64::from(rssi)))
            }
            None => SignalQuality::Poor,
        }
    }

    /// Snapshot of the signal for diagnostics.
    #[must_use]
    pub fn sample(&self) -> ProximitySample {
        ProximitySample {
            proximity: self.proximity,
            rssi: self.current_rssi,
            smoothed_rssi: self.smoothed_rssi,
            quality: self.signal_quality(),
        }
    }

    /// In range and continuously so for at least `min_duration`.
    #[must_use]
    pub fn stable_in_range_for(&self, min_duration: Duration, now: DateTime<Utc>) -> bool {
        self.is_in_range()
            && self
                .last_entered_range_at
                .is_some_and(|entered| has_elapsed(entered, now, min_duration))
    }

    /// Inside the region since at least `min_duration` ago.
    #[must_use]
    pub fn stable_in_region_for(&self, min_duration: Duration, now: DateTime<Utc>) -> bool {
        self.is_in_region
            && self
                .last_region_entry
                .is_some_and(|entered| has_elapsed(entered, now, min_duration))
    }

    /// Fraction of the trailing `window` during which the beacon was in range.
    ///
    /// Time before registration, or before the oldest retained event once the
    /// history has been truncated, is excluded from the denominator.
    #[must_use]
    pub fn presence_ratio(&self, window: Duration, now: DateTime<Utc>) -> f64 {
        let current = if self.is_in_range() { 1.0 } else { 0.0 };

        let tracked_from = if self.history_truncated {
            self.recent_events
                .front()
                .map_or(self.first_seen, |entry| entry.recorded_at)
        } else {
            self.first_seen
        };
        // A window reaching past the representable range covers the whole history.
        let start = chrono::TimeDelta::from_std(window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .map_or(tracked_from, |start| start.max(tracked_from));
        if start >= now {
            return current;
        }

        let mut in_range = self
            .recent_events
            .iter()
            .rev()
            .find(|entry| entry.recorded_at <= start)
            .is_some_and(|entry| entry.in_range_after);
        let mut cursor = start;
        let mut in_range_time = Duration::ZERO;

        for entry in self
            .recent_events
            .iter()
            .filter(|entry| entry.recorded_at > start && entry.recorded_at <= now)
        {
            if in_range {
                in_range_time += elapsed_between(cursor, entry.recorded_at);
            }
            cursor = entry.recorded_at;
            in_range = entry.in_range_after;
        }
        if in_range {
            in_range_time += elapsed_between(cursor, now);
        }

        let total = elapsed_between(start, now);
        (in_range_time.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
    }
}
