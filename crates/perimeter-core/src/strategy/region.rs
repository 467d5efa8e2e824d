//! Region strategy: trusts region enter/exit events and ignores RSSI.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::result::{BeaconConditionDetail, RuleEvaluationResult};
use super::{evaluate_rules, RuleProcessingStrategy, StrategyKind};
use crate::beacon::{BeaconIdentity, ProximityLevel, SignalQuality};
use crate::clock::has_elapsed;
use crate::geo::Location;
use crate::registry::BeaconRegistry;
use crate::rules::{FineLocationRule, Rule};

/// Tuning for [`RegionStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionStrategyConfig {
    /// How long the region must have been entered before it is trusted.
    pub minimum_region_stability_duration: Duration,
    /// Require a recorded region entry.
    pub require_entry_exit_history: bool,
    /// After a re-entry, how long since that entry before it is trusted.
    pub minimum_region_transition_interval: Duration,
}

impl Default for RegionStrategyConfig {
    fn default() -> Self {
        Self {
            minimum_region_stability_duration: Duration::from_secs(5),
            require_entry_exit_history: true,
            minimum_region_transition_interval: Duration::from_secs(10),
        }
    }
}

/// Region-membership strategy. Stateless apart from its configuration.
#[derive(Debug, Clone)]
pub struct RegionStrategy {
    config: RegionStrategyConfig,
    timezone: Tz,
}

impl Default for RegionStrategy {
    fn default() -> Self {
        Self::new(RegionStrategyConfig::default())
    }
}

impl RegionStrategy {
    /// Create a strategy evaluating time rules in UTC.
    #[must_use]
    pub const fn new(config: RegionStrategyConfig) -> Self {
        Self {
            config,
            timezone: chrono_tz::UTC,
        }
    }

    /// Evaluate time rules in `timezone`.
    #[must_use]
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Tuning in use.
    #[must_use]
    pub const fn config(&self) -> &RegionStrategyConfig {
        &self.config
    }

    /// Whether the beacon's region membership can be trusted as "inside".
    #[must_use]
    pub fn is_beacon_region_reliable(
        &self,
        beacon: &BeaconIdentity,
        registry: &BeaconRegistry,
        now: DateTime<Utc>,
    ) -> bool {
        let config = &self.config;
        let Some(status) = registry.status(beacon) else {
            return false;
        };
        if !status.is_in_region()
            || !status.stable_in_region_for(config.minimum_region_stability_duration, now)
        {
            return false;
        }
        if !config.require_entry_exit_history {
            return true;
        }

        let Some(entry) = status.last_region_entry() else {
            return false;
        };
        match status.last_region_exit() {
            // An exit newer than the entry means the entry is stale.
            Some(exit) if exit > entry => false,
            // Re-entry after an exit must have settled.
            Some(_) => has_elapsed(entry, now, config.minimum_region_transition_interval),
            None => true,
        }
    }

    fn judge(
        &self,
        flr: &FineLocationRule,
        registry: &BeaconRegistry,
        now: DateTime<Utc>,
    ) -> BeaconConditionDetail {
        let status = registry.status(&flr.beacon);
        let reliable = self.is_beacon_region_reliable(&flr.beacon, registry, now);

        BeaconConditionDetail {
            fine_location_rule_id: flr.id,
            beacon: flr.beacon,
            behavior: flr.behavior,
            proximity: status.map_or(ProximityLevel::Unknown, |s| s.proximity()),
            signal_quality: status.map_or(SignalQuality::Poor, |s| s.signal_quality()),
            presence_ratio: None,
            is_in_region: status.is_some_and(|s| s.is_in_region()),
            reliable,
            beacon_present: reliable,
            hysteresis_blocked: None,
            condition_blocks: flr.behavior.blocks_when(reliable),
        }
    }
}

impl RuleProcessingStrategy for RegionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Region
    }

    fn evaluate(
        &mut self,
        rules: &[Rule],
        location: Option<&Location>,
        registry: &BeaconRegistry,
        now: DateTime<Utc>,
    ) -> RuleEvaluationResult {
        evaluate_rules(
            StrategyKind::Region,
            rules,
            location,
            registry,
            now,
            self.timezone,
            |_, flr| self.judge(flr, registry, now),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{BeaconDevice, BeaconEvent};
    use crate::rules::BeaconBehavior;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn beacon() -> BeaconIdentity {
        BeaconIdentity::new(Uuid::nil(), 3, 4)
    }

    fn registry() -> BeaconRegistry {
        let mut registry = BeaconRegistry::default();
        registry.register(beacon(), BeaconDevice::named("door"), at(0));
        registry
    }

    fn rule(behavior: BeaconBehavior) -> Rule {
        Rule {
            id: Uuid::from_u128(10),
            name: "office".into(),
            is_active: true,
            gps_location: None,
            time_rules: Vec::new(),
            fine_location_rules: vec![FineLocationRule {
                id: Uuid::from_u128(11),
                beacon: beacon(),
                behavior,
                is_active: true,
            }],
            blocked_resource_ids: vec!["com.example.chat".into()],
        }
    }

    #[test]
    fn test_entry_must_be_stable() {
        let mut registry = registry();
        let strategy = RegionStrategy::default();
        registry.process_event(BeaconEvent::RegionEntered { beacon: beacon() }, at(10));

        assert!(!strategy.is_beacon_region_reliable(&beacon(), &registry, at(10)));
        assert!(!strategy.is_beacon_region_reliable(&beacon(), &registry, at(14)));
        assert!(strategy.is_beacon_region_reliable(&beacon(), &registry, at(15)));
    }

    #[test]
    fn test_reentry_waits_for_transition_interval() {
        let mut registry = registry();
        let strategy = RegionStrategy::default();
        registry.process_event(BeaconEvent::RegionEntered { beacon: beacon() }, at(0));
        registry.process_event(BeaconEvent::RegionExited { beacon: beacon() }, at(20));
        assert!(!strategy.is_beacon_region_reliable(&beacon(), &registry, at(25)));

        registry.process_event(BeaconEvent::RegionEntered { beacon: beacon() }, at(30));
        // Stable after 5 s, but a re-entry needs 10 s.
        assert!(!strategy.is_beacon_region_reliable(&beacon(), &registry, at(36)));
        assert!(strategy.is_beacon_region_reliable(&beacon(), &registry, at(40)));
    }

    #[test]
    fn test_history_not_required() {
        let mut registry = registry();
        let strategy = RegionStrategy::new(RegionStrategyConfig {
            minimum_region_stability_duration: Duration::ZERO,
            require_entry_exit_history: false,
            minimum_region_transition_interval: Duration::from_secs(60),
        });
        registry.process_event(BeaconEvent::RegionEntered { beacon: beacon() }, at(0));
        registry.process_event(BeaconEvent::RegionExited { beacon: beacon() }, at(1));
        registry.process_event(BeaconEvent::RegionEntered { beacon: beacon() }, at(2));
        assert!(strategy.is_beacon_region_reliable(&beacon(), &registry, at(2)));
    }

    #[test]
    fn test_behavior_mapping() {
        let mut registry = registry();
        let mut strategy = RegionStrategy::default();
        let allowed = [rule(BeaconBehavior::AllowedIn)];
        let blocked = [rule(BeaconBehavior::BlockedIn)];

        // Outside: AllowedIn blocks, BlockedIn does not.
        assert!(strategy
            .evaluate(&allowed, None, &registry, at(0))
            .is_rule_blocking(&allowed[0].id));
        assert!(!strategy
            .evaluate(&blocked, None, &registry, at(0))
            .is_rule_blocking(&blocked[0].id));

        registry.process_event(BeaconEvent::RegionEntered { beacon: beacon() }, at(0));
        assert!(!strategy
            .evaluate(&allowed, None, &registry, at(10))
            .is_rule_blocking(&allowed[0].id));
        let result = strategy.evaluate(&blocked, None, &registry, at(10));
        assert!(result.is_rule_blocking(&blocked[0].id));
        let detail = result.detailed_results[&blocked[0].id]
            .beacon_details
            .clone()
            .unwrap();
        assert_eq!(detail.hysteresis_blocked, None);
        assert!(detail.is_in_region);
    }
}
