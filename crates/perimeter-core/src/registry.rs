//! Beacon registry.
//!
//! The registry owns one [`BeaconStatus`] per registered beacon and is the only
//! place raw [`BeaconEvent`]s are applied. It keeps two derived sets, beacons
//! in range and beacons in near range, which always equal the set of statuses
//! reporting `is_in_range` / `is_near_range`.
//!
//! The registry is single-owner: the engine runtime holds it and sensor events
//! are queued into that task rather than applied from other threads.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::beacon::{
    AuthorizationStatus, BeaconDevice, BeaconEvent, BeaconIdentity, BeaconStatus,
    ProximityCalibration, RecordedEvent, SignalQuality, EVENT_HISTORY_LIMIT,
};

/// What happened to an event handed to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Applied to a registered beacon.
    Applied {
        /// Whether the beacon's in-range membership changed.
        range_changed: bool,
    },
    /// Beacon-specific event for a beacon that is not registered.
    DroppedUnregistered,
    /// System-level event, recorded for diagnostics.
    Recorded,
}

/// Region membership as reported by the sensor subsystem's own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RegionState {
    /// Inside the beacon's region.
    Inside,
    /// Outside the beacon's region.
    Outside,
    /// The subsystem does not know yet.
    Unknown,
}

/// The sensor subsystem's source of truth for region membership.
///
/// Queried on startup so restored state is not trusted blindly.
pub trait RegionStateSource: Send + Sync {
    /// Current membership for every monitored beacon the subsystem knows about.
    fn current_region_states(&self) -> Vec<(BeaconIdentity, RegionState)>;
}

/// Aggregate counters across all tracked beacons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DetectionStatistics {
    /// Registered beacons.
    pub tracked: usize,
    /// Beacons currently in range.
    pub in_range: usize,
    /// Beacons currently in near range.
    pub in_near_range: usize,
    /// Beacons whose region is currently entered.
    pub in_region: usize,
    /// Sum of detections across beacons.
    pub total_detections: u64,
    /// Sum of region entries across beacons.
    pub total_region_entries: u64,
    /// Beacon events dropped because the beacon was not registered.
    pub dropped_unregistered_events: u64,
    /// Samples reported with an invalid RSSI.
    pub invalid_rssi_samples: u64,
}

/// System-level sensor state, kept for diagnostics only.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct SystemDiagnostics {
    /// Last reported authorization.
    pub authorization: Option<AuthorizationStatus>,
    /// Whether monitoring is running.
    pub monitoring_active: bool,
    /// Beacons named by the last `MonitoringStarted`.
    pub monitored: BTreeSet<BeaconIdentity>,
    /// Last sensor error.
    pub last_error: Option<String>,
    /// Number of `NoBeacon` reports.
    pub no_beacon_reports: u64,
    /// Most recent system-level events, oldest first.
    #[schema(value_type = Vec<RecordedEvent>)]
    pub recent_events: VecDeque<RecordedEvent>,
}

impl SystemDiagnostics {
    fn record(&mut self, event: BeaconEvent, now: DateTime<Utc>) {
        match &event {
            BeaconEvent::NoBeacon { constraint } => {
                self.no_beacon_reports += 1;
                debug!(constraint = %constraint, "No beacon matched ranging constraint");
            }
            BeaconEvent::MonitoringStarted { beacons } => {
                self.monitoring_active = true;
                self.monitored.clone_from(beacons);
                info!(count = beacons.len(), "Beacon monitoring started");
            }
            BeaconEvent::MonitoringStopped => {
                self.monitoring_active = false;
                info!("Beacon monitoring stopped");
            }
            BeaconEvent::AuthorizationChanged { status } => {
                self.authorization = Some(*status);
                if status.allows_monitoring() {
                    info!(status = ?status, "Sensor authorization changed");
                } else {
                    warn!(status = ?status, "Sensor authorization does not allow monitoring");
                }
            }
            BeaconEvent::Error { reason } => {
                self.last_error = Some(reason.clone());
                warn!(reason = %reason, "Sensor layer reported an error");
            }
            _ => {}
        }

        if self.recent_events.len() == EVENT_HISTORY_LIMIT {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(RecordedEvent {
            event,
            recorded_at: now,
            in_range_after: false,
        });
    }
}

/// Owner of all tracked beacon state.
#[derive(Debug, Clone)]
pub struct BeaconRegistry {
    calibration: ProximityCalibration,
    statuses: HashMap<BeaconIdentity, BeaconStatus>,
    in_range: BTreeSet<BeaconIdentity>,
    in_near_range: BTreeSet<BeaconIdentity>,
    diagnostics: SystemDiagnostics,
    dropped_unregistered_events: u64,
    invalid_rssi_samples: u64,
}

impl Default for BeaconRegistry {
    fn default() -> Self {
        Self::new(ProximityCalibration::default())
    }
}

impl BeaconRegistry {
    /// Create an empty registry using the given RSSI calibration.
    #[must_use]
    pub fn new(calibration: ProximityCalibration) -> Self {
        Self {
            calibration,
            statuses: HashMap::new(),
            in_range: BTreeSet::new(),
            in_near_range: BTreeSet::new(),
            diagnostics: SystemDiagnostics::default(),
            dropped_unregistered_events: 0,
            invalid_rssi_samples: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a beacon, or replace its device metadata if already registered.
    ///
    /// Re-registering never resets tracked signal state.
    pub fn register(&mut self, identity: BeaconIdentity, device: BeaconDevice, now: DateTime<Utc>) {
        if let Some(status) = self.statuses.get_mut(&identity) {
            debug!(beacon = %identity, "Updating device metadata for registered beacon");
            status.set_device(device);
            return;
        }

        debug!(beacon = %identity, name = %device.name, "Registering beacon");
        self.statuses.insert(
            identity,
            BeaconStatus::new(identity, device, self.calibration, now),
        );
        self.refresh_membership(identity);
    }

    /// Forget a beacon. No-op if it is not registered.
    pub fn unregister(&mut self, identity: &BeaconIdentity) -> Option<BeaconStatus> {
        let removed = self.statuses.remove(identity);
        self.in_range.remove(identity);
        self.in_near_range.remove(identity);
        if removed.is_some() {
            debug!(beacon = %identity, "Unregistered beacon");
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Event application
    // -------------------------------------------------------------------------

    /// Apply one event and bring the derived sets up to date.
    pub fn process_event(&mut self, event: BeaconEvent, now: DateTime<Utc>) -> EventDisposition {
        let identity = event.beacon();
        let disposition = self.apply(event, now);
        if let (Some(identity), EventDisposition::Applied { .. }) = (identity, disposition) {
            self.refresh_membership(identity);
        }
        disposition
    }

    /// Apply a batch in order, recomputing the derived sets once at the end.
    pub fn process_events<I>(&mut self, events: I, now: DateTime<Utc>) -> Vec<EventDisposition>
    where
        I: IntoIterator<Item = BeaconEvent>,
    {
        let dispositions: Vec<EventDisposition> =
            events.into_iter().map(|event| self.apply(event, now)).collect();
        self.rebuild_membership();
        dispositions
    }

    fn apply(&mut self, event: BeaconEvent, now: DateTime<Utc>) -> EventDisposition {
        let event = event.normalized();

        let Some(identity) = event.beacon() else {
            self.diagnostics.record(event, now);
            return EventDisposition::Recorded;
        };

        let Some(status) = self.statuses.get_mut(&identity) else {
            self.dropped_unregistered_events += 1;
            warn!(
                beacon = %identity,
                event = event.kind(),
                "Dropping event for unregistered beacon"
            );
            return EventDisposition::DroppedUnregistered;
        };

        if matches!(event, BeaconEvent::MissingBeacon { .. }) {
            self.invalid_rssi_samples += 1;
            warn!(beacon = %identity, "Beacon reported an invalid RSSI sample");
        }

        let transition = status.update_from_event(&event, now);
        debug!(
            beacon = %identity,
            event = event.kind(),
            proximity = %transition.proximity_after,
            in_range = transition.is_in_range,
            "Applied beacon event"
        );

        EventDisposition::Applied {
            range_changed: transition.range_changed(),
        }
    }

    fn refresh_membership(&mut self, identity: BeaconIdentity) {
        let (in_range, near) = self
            .statuses
            .get(&identity)
            .map_or((false, false), |s| (s.is_in_range(), s.is_near_range()));

        if in_range {
            self.in_range.insert(identity);
        } else {
            self.in_range.remove(&identity);
        }
        if near {
            self.in_near_range.insert(identity);
        } else {
            self.in_near_range.remove(&identity);
        }
    }

    fn rebuild_membership(&mut self) {
        self.in_range = self
            .statuses
            .values()
            .filter(|s| s.is_in_range())
            .map(BeaconStatus::identity)
            .collect();
        self.in_near_range = self
            .statuses
            .values()
            .filter(|s| s.is_near_range())
            .map(BeaconStatus::identity)
            .collect();
    }

    /// Reconcile region membership with the sensor subsystem's own state.
    ///
    /// Emits `RegionEntered`/`RegionExited` only where the registry disagrees
    /// with `snapshot`. Returns the number of corrections applied.
    pub fn synchronize_regions<I>(&mut self, snapshot: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = (BeaconIdentity, RegionState)>,
    {
        let corrections: Vec<BeaconEvent> = snapshot
            .into_iter()
            .filter_map(|(beacon, state)| {
                let Some(status) = self.statuses.get(&beacon) else {
                    debug!(beacon = %beacon, "Ignoring region state for unregistered beacon");
                    return None;
                };
                match (state, status.is_in_region()) {
                    (RegionState::Inside, false) => Some(BeaconEvent::RegionEntered { beacon }),
                    (RegionState::Outside, true) => Some(BeaconEvent::RegionExited { beacon }),
                    _ => None,
                }
            })
            .collect();

        let count = corrections.len();
        if count > 0 {
            info!(corrections = count, "Re-synchronized region membership");
            self.process_events(corrections, now);
        }
        count
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Calibration used for new statuses.
    #[must_use]
    pub const fn calibration(&self) -> &ProximityCalibration {
        &self.calibration
    }

    /// Status of a registered beacon.
    #[must_use]
    pub fn status(&self, identity: &BeaconIdentity) -> Option<&BeaconStatus> {
        self.statuses.get(identity)
    }

    /// All statuses, ordered by identity.
    #[must_use]
    pub fn statuses(&self) -> Vec<&BeaconStatus> {
        let mut all: Vec<&BeaconStatus> = self.statuses.values().collect();
        all.sort_by_key(|s| s.identity());
        all
    }

    /// Whether the beacon is registered.
    #[must_use]
    pub fn contains(&self, identity: &BeaconIdentity) -> bool {
        self.statuses.contains_key(identity)
    }

    /// Number of registered beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Whether the beacon is in range.
    #[must_use]
    pub fn is_in_range(&self, identity: &BeaconIdentity) -> bool {
        self.in_range.contains(identity)
    }

    /// Whether the beacon is in near range.
    #[must_use]
    pub fn is_in_near_range(&self, identity: &BeaconIdentity) -> bool {
        self.in_near_range.contains(identity)
    }

    /// Every beacon currently in range.
    #[must_use]
    pub const fn all_in_range(&self) -> &BTreeSet<BeaconIdentity> {
        &self.in_range
    }

    /// Every beacon currently in near range.
    #[must_use]
    pub const fn all_in_near_range(&self) -> &BTreeSet<BeaconIdentity> {
        &self.in_near_range
    }

    /// Signal quality of a beacon; `Poor` when unknown.
    #[must_use]
    pub fn signal_quality(&self, identity: &BeaconIdentity) -> SignalQuality {
        self.status(identity)
            .map_or(SignalQuality::Poor, BeaconStatus::signal_quality)
    }

    /// Fraction of the trailing `window` the beacon spent in range; `0.0` when unknown.
    #[must_use]
    pub fn presence_ratio(
        &self,
        identity: &BeaconIdentity,
        window: Duration,
        now: DateTime<Utc>,
    ) -> f64 {
        self.status(identity)
            .map_or(0.0, |s| s.presence_ratio(window, now))
    }

    /// In range continuously for at least `min_duration`.
    #[must_use]
    pub fn stable_in_range_for(
        &self,
        identity: &BeaconIdentity,
        min_duration: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.status(identity)
            .is_some_and(|s| s.stable_in_range_for(min_duration, now))
    }

    /// Inside the region for at least `min_duration`.
    #[must_use]
    pub fn stable_in_region_for(
        &self,
        identity: &BeaconIdentity,
        min_duration: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.status(identity)
            .is_some_and(|s| s.stable_in_region_for(min_duration, now))
    }

    /// Aggregate counters.
    #[must_use]
    pub fn detection_statistics(&self) -> DetectionStatistics {
        DetectionStatistics {
            tracked: self.statuses.len(),
            in_range: self.in_range.len(),
            in_near_range: self.in_near_range.len(),
            in_region: self.statuses.values().filter(|s| s.is_in_region()).count(),
            total_detections: self.statuses.values().map(BeaconStatus::total_detections).sum(),
            total_region_entries: self
                .statuses
                .values()
                .map(BeaconStatus::region_entry_count)
                .sum(),
            dropped_unregistered_events: self.dropped_unregistered_events,
            invalid_rssi_samples: self.invalid_rssi_samples,
        }
    }

    /// System-level sensor state.
    #[must_use]
    pub const fn diagnostics(&self) -> &SystemDiagnostics {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn beacon(minor: u16) -> BeaconIdentity {
        BeaconIdentity::new(Uuid::nil(), 1, minor)
    }

    fn registry_with(beacons: &[BeaconIdentity]) -> BeaconRegistry {
        let mut registry = BeaconRegistry::default();
        for b in beacons {
            registry.register(*b, BeaconDevice::named(format!("beacon {}", b.minor)), at(0));
        }
        registry
    }

    #[test]
    fn test_unregistered_events_are_dropped() {
        let mut registry = registry_with(&[beacon(1)]);
        let disposition = registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(2),
                rssi: -50,
            },
            at(1),
        );
        assert_eq!(disposition, EventDisposition::DroppedUnregistered);
        assert!(registry.all_in_range().is_empty());
        assert_eq!(registry.detection_statistics().dropped_unregistered_events, 1);
    }

    #[test]
    fn test_derived_sets_follow_events() {
        let mut registry = registry_with(&[beacon(1), beacon(2)]);
        registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(1),
                rssi: -45,
            },
            at(1),
        );
        registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(2),
                rssi: -80,
            },
            at(1),
        );
        assert!(registry.is_in_range(&beacon(1)));
        assert!(registry.is_in_near_range(&beacon(1)));
        assert!(registry.is_in_range(&beacon(2)));
        assert!(!registry.is_in_near_range(&beacon(2)));

        registry.process_event(BeaconEvent::Lost { beacon: beacon(1) }, at(2));
        assert!(!registry.is_in_range(&beacon(1)));
        assert_eq!(registry.all_in_range().len(), 1);
    }

    #[test]
    fn test_batch_matches_sequential_application() {
        let events = vec![
            BeaconEvent::Detected {
                beacon: beacon(1),
                rssi: -60,
            },
            BeaconEvent::RegionEntered { beacon: beacon(2) },
            BeaconEvent::Lost { beacon: beacon(1) },
            BeaconEvent::Detected {
                beacon: beacon(1),
                rssi: -48,
            },
        ];

        let mut batched = registry_with(&[beacon(1), beacon(2)]);
        batched.process_events(events.clone(), at(5));

        let mut sequential = registry_with(&[beacon(1), beacon(2)]);
        for event in events {
            sequential.process_event(event, at(5));
        }

        assert_eq!(batched.all_in_range(), sequential.all_in_range());
        assert_eq!(batched.all_in_near_range(), sequential.all_in_near_range());
        assert_eq!(
            batched.status(&beacon(1)).map(BeaconStatus::total_detections),
            Some(2)
        );
    }

    #[test]
    fn test_register_is_idempotent_and_preserves_state() {
        let mut registry = registry_with(&[beacon(1)]);
        registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(1),
                rssi: -55,
            },
            at(1),
        );
        registry.register(beacon(1), BeaconDevice::named("renamed"), at(9));

        let status = registry.status(&beacon(1)).unwrap();
        assert_eq!(status.device().name, "renamed");
        assert_eq!(status.total_detections(), 1);
        assert_eq!(status.first_seen(), at(0));
        assert!(registry.is_in_range(&beacon(1)));
    }

    #[test]
    fn test_unregister_purges_sets() {
        let mut registry = registry_with(&[beacon(1)]);
        registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(1),
                rssi: -40,
            },
            at(1),
        );
        assert!(registry.unregister(&beacon(1)).is_some());
        assert!(registry.all_in_range().is_empty());
        assert!(registry.all_in_near_range().is_empty());
        assert!(registry.unregister(&beacon(1)).is_none());
    }

    #[test]
    fn test_zero_rssi_detection_is_treated_as_missing() {
        let mut registry = registry_with(&[beacon(1)]);
        registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(1),
                rssi: 0,
            },
            at(1),
        );
        let status = registry.status(&beacon(1)).unwrap();
        assert_eq!(status.total_detections(), 0);
        assert_eq!(
            status.recent_events().back().map(|e| e.event.kind()),
            Some("missing_beacon")
        );
        assert_eq!(registry.detection_statistics().invalid_rssi_samples, 1);
    }

    #[test]
    fn test_zero_rssi_from_unregistered_beacon_is_only_dropped() {
        let mut registry = registry_with(&[beacon(1)]);
        let disposition = registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(9),
                rssi: 0,
            },
            at(1),
        );
        assert_eq!(disposition, EventDisposition::DroppedUnregistered);

        let stats = registry.detection_statistics();
        assert_eq!(stats.dropped_unregistered_events, 1);
        assert_eq!(stats.invalid_rssi_samples, 0);
    }

    #[test]
    fn test_system_events_update_diagnostics() {
        let mut registry = registry_with(&[beacon(1)]);
        registry.process_event(
            BeaconEvent::MonitoringStarted {
                beacons: [beacon(1)].into_iter().collect(),
            },
            at(1),
        );
        registry.process_event(
            BeaconEvent::AuthorizationChanged {
                status: AuthorizationStatus::Denied,
            },
            at(2),
        );
        registry.process_event(
            BeaconEvent::Error {
                reason: "radio off".into(),
            },
            at(3),
        );

        let diagnostics = registry.diagnostics();
        assert!(diagnostics.monitoring_active);
        assert_eq!(diagnostics.monitored.len(), 1);
        assert_eq!(diagnostics.authorization, Some(AuthorizationStatus::Denied));
        assert_eq!(diagnostics.last_error.as_deref(), Some("radio off"));
        assert_eq!(diagnostics.recent_events.len(), 3);
        // Per-beacon state untouched.
        assert!(registry.status(&beacon(1)).unwrap().recent_events().is_empty());
    }

    #[test]
    fn test_synchronize_regions_only_corrects_disagreements() {
        let mut registry = registry_with(&[beacon(1), beacon(2), beacon(3)]);
        registry.process_event(BeaconEvent::RegionEntered { beacon: beacon(2) }, at(1));

        let corrections = registry.synchronize_regions(
            vec![
                (beacon(1), RegionState::Inside),
                (beacon(2), RegionState::Inside),
                (beacon(3), RegionState::Unknown),
                (beacon(9), RegionState::Inside),
            ],
            at(2),
        );
        assert_eq!(corrections, 1);
        assert!(registry.status(&beacon(1)).unwrap().is_in_region());
        assert_eq!(registry.status(&beacon(2)).unwrap().region_entry_count(), 1);
        assert!(registry.is_in_range(&beacon(1)));

        let corrections =
            registry.synchronize_regions(vec![(beacon(2), RegionState::Outside)], at(3));
        assert_eq!(corrections, 1);
        assert!(!registry.is_in_range(&beacon(2)));
    }

    #[test]
    fn test_statistics() {
        let mut registry = registry_with(&[beacon(1), beacon(2)]);
        registry.process_events(
            vec![
                BeaconEvent::Detected {
                    beacon: beacon(1),
                    rssi: -60,
                },
                BeaconEvent::Detected {
                    beacon: beacon(1),
                    rssi: -61,
                },
                BeaconEvent::RegionEntered { beacon: beacon(2) },
            ],
            at(1),
        );
        let stats = registry.detection_statistics();
        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.in_range, 2);
        assert_eq!(stats.in_region, 1);
        assert_eq!(stats.total_detections, 2);
        assert_eq!(stats.total_region_entries, 1);
    }
}
