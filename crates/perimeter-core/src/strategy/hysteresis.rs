//! Proximity-to-blocking state machine.
//!
//! Each beacon-gated rule keeps a [`BlockingStateInfo`]. A proximity change
//! starts a hold period during which the blocking state is frozen; after that,
//! unblocking needs a stronger proximity than staying unblocked does.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::beacon::ProximityLevel;
use crate::clock::has_elapsed;
use crate::rules::RuleId;

/// Thresholds for the hysteresis state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HysteresisConfig {
    /// While unblocked, proximity below this blocks.
    pub blocking_threshold: ProximityLevel,

    /// While blocked, proximity at or above this (with a reliable beacon) unblocks.
    pub unblocking_threshold: ProximityLevel,

    /// Hold period after any proximity change.
    pub transition_stability_duration: Duration,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            blocking_threshold: ProximityLevel::Far,
            unblocking_threshold: ProximityLevel::Near,
            transition_stability_duration: Duration::from_secs(3),
        }
    }
}

impl HysteresisConfig {
    /// Every problem with this configuration, as `(field, message)` pairs.
    #[must_use]
    pub fn problems(&self) -> Vec<(&'static str, String)> {
        let mut problems = Vec::new();
        if self.blocking_threshold == ProximityLevel::Unknown {
            problems.push((
                "hysteresis.blocking_threshold",
                "must not be 'unknown'".to_string(),
            ));
        }
        if self.unblocking_threshold == ProximityLevel::Unknown {
            problems.push((
                "hysteresis.unblocking_threshold",
                "must not be 'unknown'".to_string(),
            ));
        }
        if self.unblocking_threshold < self.blocking_threshold {
            problems.push((
                "hysteresis.unblocking_threshold",
                format!(
                    "must be at least as strong as the blocking threshold ('{}' < '{}')",
                    self.unblocking_threshold, self.blocking_threshold
                ),
            ));
        }
        problems
    }
}

/// Hysteresis memory for one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingStateInfo {
    /// Whether the beacon is currently treated as absent.
    pub is_currently_blocked: bool,

    /// When `is_currently_blocked` last flipped, or when tracking began.
    pub last_state_change_at: DateTime<Utc>,

    /// Proximity seen on the previous evaluation.
    pub last_proximity: Option<ProximityLevel>,

    /// When proximity last changed; `None` until the first change.
    pub proximity_state_changed_at: Option<DateTime<Utc>>,
}

impl BlockingStateInfo {
    /// Beacons start out assumed absent.
    const fn new(proximity: ProximityLevel, now: DateTime<Utc>) -> Self {
        Self {
            is_currently_blocked: true,
            last_state_change_at: now,
            last_proximity: Some(proximity),
            proximity_state_changed_at: None,
        }
    }
}

/// Per-rule hysteresis state.
#[derive(Debug, Clone, Default)]
pub struct HysteresisTracker {
    config: HysteresisConfig,
    states: HashMap<RuleId, BlockingStateInfo>,
}

impl HysteresisTracker {
    /// Create a tracker with no memory.
    #[must_use]
    pub fn new(config: HysteresisConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Thresholds in use.
    #[must_use]
    pub const fn config(&self) -> &HysteresisConfig {
        &self.config
    }

    /// Feed one observation for `rule_id` and return whether it is now blocked.
    pub fn update(
        &mut self,
        rule_id: RuleId,
        proximity: ProximityLevel,
        reliable: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let config = self.config;
        let state = self
            .states
            .entry(rule_id)
            .or_insert_with(|| BlockingStateInfo::new(proximity, now));

        if state.last_proximity != Some(proximity) {
            state.last_proximity = Some(proximity);
            state.proximity_state_changed_at = Some(now);
        }

        if let Some(changed_at) = state.proximity_state_changed_at {
            if !has_elapsed(changed_at, now, config.transition_stability_duration) {
                return state.is_currently_blocked;
            }
        }

        let next = if state.is_currently_blocked {
            !(proximity >= config.unblocking_threshold && reliable)
        } else {
            proximity < config.blocking_threshold || !reliable
        };

        if next != state.is_currently_blocked {
            info!(
                rule_id = %rule_id,
                proximity = %proximity,
                reliable,
                blocked = next,
                "Hysteresis state changed"
            );
            state.is_currently_blocked = next;
            state.last_state_change_at = now;
        }
        next
    }

    /// Memory for `rule_id`, if it has been evaluated.
    #[must_use]
    pub fn state(&self, rule_id: &RuleId) -> Option<&BlockingStateInfo> {
        self.states.get(rule_id)
    }

    /// Drop memory for rules not in `keep`.
    pub fn retain_rules<'a, I>(&mut self, keep: I)
    where
        I: IntoIterator<Item = &'a RuleId>,
    {
        let keep: std::collections::HashSet<&RuleId> = keep.into_iter().collect();
        self.states.retain(|id, _| keep.contains(id));
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.states.clear();
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

    fn tracker() -> HysteresisTracker {
        HysteresisTracker::new(HysteresisConfig::default())
    }

    #[test]
    fn test_first_evaluation_is_not_held() {
        let mut t = tracker();
        let rule = Uuid::nil();
        assert!(!t.update(rule, ProximityLevel::Near, true, at(0)));
        assert_eq!(t.state(&rule).unwrap().proximity_state_changed_at, None);
    }

    #[test]
    fn test_starts_blocked_without_signal() {
        let mut t = tracker();
        assert!(t.update(Uuid::nil(), ProximityLevel::Unknown, false, at(0)));
    }

    #[test]
    fn test_change_is_held_for_transition_period() {
        let mut t = tracker();
        let rule = Uuid::nil();
        assert!(t.update(rule, ProximityLevel::Unknown, false, at(0)));

        // Beacon appears; held for 3 s.
        assert!(t.update(rule, ProximityLevel::Near, true, at(10)));
        assert!(t.update(rule, ProximityLevel::Near, true, at(12)));
        assert!(!t.update(rule, ProximityLevel::Near, true, at(13)));
        assert_eq!(t.state(&rule).unwrap().last_state_change_at, at(13));
    }

    #[test]
    fn test_far_keeps_unblocked_but_does_not_unblock() {
        let mut t = tracker();
        let rule = Uuid::nil();

        // Blocked, Far is below the unblocking threshold.
        assert!(t.update(rule, ProximityLevel::Far, true, at(0)));
        assert!(t.update(rule, ProximityLevel::Far, true, at(10)));

        // Reach Near, wait out the hold, unblock.
        t.update(rule, ProximityLevel::Near, true, at(20));
        assert!(!t.update(rule, ProximityLevel::Near, true, at(25)));

        // Drop to Far: at the blocking threshold, stays unblocked.
        t.update(rule, ProximityLevel::Far, true, at(30));
        assert!(!t.update(rule, ProximityLevel::Far, true, at(35)));

        // Unreliable blocks.
        assert!(t.update(rule, ProximityLevel::Far, false, at(36)));
    }

    #[test]
    fn test_unreliable_beacon_never_unblocks() {
        let mut t = tracker();
        let rule = Uuid::nil();
        assert!(t.update(rule, ProximityLevel::Immediate, false, at(0)));
        assert!(t.update(rule, ProximityLevel::Immediate, false, at(60)));
    }

    #[test]
    fn test_rules_are_independent() {
        let mut t = tracker();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert!(!t.update(a, ProximityLevel::Near, true, at(0)));
        assert!(t.update(b, ProximityLevel::Unknown, false, at(0)));
        t.retain_rules([&a]);
        assert!(t.state(&a).is_some());
        assert!(t.state(&b).is_none());
    }

    #[test]
    fn test_config_problems() {
        assert!(HysteresisConfig::default().problems().is_empty());
        let bad = HysteresisConfig {
            blocking_threshold: ProximityLevel::Near,
            unblocking_threshold: ProximityLevel::Far,
            ..HysteresisConfig::default()
        };
        assert_eq!(bad.problems().len(), 1);
        let bad = HysteresisConfig {
            blocking_threshold: ProximityLevel::Unknown,
            ..HysteresisConfig::default()
        };
        assert_eq!(bad.problems()[0].0, "hysteresis.blocking_threshold");
    }
}
