//! Default strategy: RSSI reliability gate plus hysteresis.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::hysteresis::{HysteresisConfig, HysteresisTracker};
use super::result::{BeaconConditionDetail, RuleEvaluationResult};
use super::{evaluate_rules, RuleProcessingStrategy, StrategyKind};
use crate::beacon::{BeaconIdentity, ProximityLevel, SignalQuality};
use crate::geo::Location;
use crate::registry::BeaconRegistry;
use crate::rules::{FineLocationRule, Rule};

/// Named sets of tuning constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPreset {
    /// Balanced.
    #[default]
    Default,
    /// Slow to unblock, needs an immediate and steady signal.
    Conservative,
    /// Reacts within about a second.
    Responsive,
}

impl ThresholdPreset {
    /// The constants for this preset.
    #[must_use]
    pub const fn config(self) -> RssiStrategyConfig {
        match self {
            Self::Default => RssiStrategyConfig {
                minimum_stability_duration: Duration::from_secs(2),
                minimum_signal_quality: SignalQuality::Fair,
                use_strict_proximity: false,
                minimum_presence_ratio: 0.5,
                presence_analysis_window: Duration::from_secs(10),
                hysteresis: HysteresisConfig {
                    blocking_threshold: ProximityLevel::Far,
                    unblocking_threshold: ProximityLevel::Near,
                    transition_stability_duration: Duration::from_secs(3),
                },
            },
            Self::Conservative => RssiStrategyConfig {
                minimum_stability_duration: Duration::from_secs(5),
                minimum_signal_quality: SignalQuality::Good,
                use_strict_proximity: false,
                minimum_presence_ratio: 0.7,
                presence_analysis_window: Duration::from_secs(30),
                hysteresis: HysteresisConfig {
                    blocking_threshold: ProximityLevel::Far,
                    unblocking_threshold: ProximityLevel::Immediate,
                    transition_stability_duration: Duration::from_secs(5),
                },
            },
            Self::Responsive => RssiStrategyConfig {
                minimum_stability_duration: Duration::from_secs(1),
                minimum_signal_quality: SignalQuality::Fair,
                use_strict_proximity: false,
                minimum_presence_ratio: 0.3,
                presence_analysis_window: Duration::from_secs(5),
                hysteresis: HysteresisConfig {
                    blocking_threshold: ProximityLevel::Far,
                    unblocking_threshold: ProximityLevel::Near,
                    transition_stability_duration: Duration::from_secs(1),
                },
            },
        }
    }

    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Conservative => "conservative",
            Self::Responsive => "responsive",
        }
    }
}

impl fmt::Display for ThresholdPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "conservative" => Ok(Self::Conservative),
            "responsive" => Ok(Self::Responsive),
            other => Err(format!("unknown threshold preset '{other}'")),
        }
    }
}

/// Tuning for [`RssiStrategy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RssiStrategyConfig {
    /// How long a beacon must stay in range before it is trusted.
    pub minimum_stability_duration: Duration,
    /// Weakest acceptable signal quality.
    pub minimum_signal_quality: SignalQuality,
    /// Require near range instead of plain range.
    pub use_strict_proximity: bool,
    /// Minimum in-range fraction of the analysis window.
    pub minimum_presence_ratio: f64,
    /// Trailing window for the presence ratio.
    pub presence_analysis_window: Duration,
    /// Hysteresis thresholds.
    pub hysteresis: HysteresisConfig,
}

impl Default for RssiStrategyConfig {
    fn default() -> Self {
        ThresholdPreset::Default.config()
    }
}

impl RssiStrategyConfig {
    /// Every problem with this configuration, as `(field, message)` pairs.
    #[must_use]
    pub fn problems(&self) -> Vec<(&'static str, String)> {
        let mut problems = self.hysteresis.problems();
        if !(0.0..=1.0).contains(&self.minimum_presence_ratio) {
            problems.push((
                "minimum_presence_ratio",
                format!("must be within 0.0..=1.0 (got {})", self.minimum_presence_ratio),
            ));
        }
        if self.presence_analysis_window.is_zero() && self.minimum_presence_ratio > 0.0 {
            problems.push((
                "presence_analysis_window_secs",
                "must be positive when a presence ratio is required".to_string(),
            ));
        }
        problems
    }
}

/// Why a beacon is or is not trusted by the default strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReliabilityReport {
    /// The beacon has a status in the registry.
    pub registered: bool,
    /// Proximity meets the range criterion.
    pub range_ok: bool,
    /// Signal quality at evaluation time.
    pub signal_quality: SignalQuality,
    /// Quality meets the minimum.
    pub quality_ok: bool,
    /// In range for the minimum stability duration.
    pub stable: bool,
    /// In-range fraction of the analysis window.
    pub presence_ratio: f64,
    /// Presence ratio meets the minimum.
    pub presence_ok: bool,
}

impl ReliabilityReport {
    /// All gates passed.
    #[must_use]
    pub const fn is_reliable(&self) -> bool {
        self.registered && self.range_ok && self.quality_ok && self.stable && self.presence_ok
    }
}

/// RSSI-driven strategy with per-rule hysteresis.
#[derive(Debug, Clone)]
pub struct RssiStrategy {
    config: RssiStrategyConfig,
    timezone: Tz,
    hysteresis: HysteresisTracker,
}

impl RssiStrategy {
    /// Create a strategy evaluating time rules in UTC.
    #[must_use]
    pub fn new(config: RssiStrategyConfig) -> Self {
        Self {
            hysteresis: HysteresisTracker::new(config.hysteresis),
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
    pub const fn config(&self) -> &RssiStrategyConfig {
        &self.config
    }

    /// Hysteresis memory.
    #[must_use]
    pub const fn hysteresis(&self) -> &HysteresisTracker {
        &self.hysteresis
    }

    /// Run the reliability gate for one beacon.
    #[must_use]
    pub fn beacon_reliability(
        &self,
        beacon: &BeaconIdentity,
        registry: &BeaconRegistry,
        now: DateTime<Utc>,
    ) -> ReliabilityReport {
        let config = &self.config;
        let registered = registry.contains(beacon);
        let range_ok = if config.use_strict_proximity {
            registry.is_in_near_range(beacon)
        } else {
            registry.is_in_range(beacon)
        };
        let signal_quality = registry.signal_quality(beacon);
        let presence_ratio =
            registry.presence_ratio(beacon, config.presence_analysis_window, now);

        ReliabilityReport {
            registered,
            range_ok,
            signal_quality,
            quality_ok: signal_quality >= config.minimum_signal_quality,
            stable: registry.stable_in_range_for(beacon, config.minimum_stability_duration, now),
            presence_ratio,
            presence_ok: presence_ratio >= config.minimum_presence_ratio,
        }
    }

    /// Whether the beacon passes every reliability gate.
    #[must_use]
    pub fn is_beacon_reliable(
        &self,
        beacon: &BeaconIdentity,
        registry: &BeaconRegistry,
        now: DateTime<Utc>,
    ) -> bool {
        self.beacon_reliability(beacon, registry, now).is_reliable()
    }

    fn judge(
        &mut self,
        rule: &Rule,
        flr: &FineLocationRule,
        registry: &BeaconRegistry,
        now: DateTime<Utc>,
    ) -> BeaconConditionDetail {
        let report = self.beacon_reliability(&flr.beacon, registry, now);
        let status = registry.status(&flr.beacon);
        let proximity = status.map_or(ProximityLevel::Unknown, |s| s.proximity());

        let blocked = self
            .hysteresis
            .update(rule.id, proximity, report.is_reliable(), now);
        let beacon_present = !blocked;

        BeaconConditionDetail {
            fine_location_rule_id: flr.id,
            beacon: flr.beacon,
            behavior: flr.behavior,
            proximity,
            signal_quality: report.signal_quality,
            presence_ratio: Some(report.presence_ratio),
            is_in_region: status.is_some_and(|s| s.is_in_region()),
            reliable: report.is_reliable(),
            beacon_present,
            hysteresis_blocked: Some(blocked),
            condition_blocks: flr.behavior.blocks_when(beacon_present),
        }
    }
}

impl Default for RssiStrategy {
    fn default() -> Self {
        Self::new(RssiStrategyConfig::default())
    }
}

impl RuleProcessingStrategy for RssiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Default
    }

    fn evaluate(
        &mut self,
        rules: &[Rule],
        location: Option<&Location>,
        registry: &BeaconRegistry,
        now: DateTime<Utc>,
    ) -> RuleEvaluationResult {
        let timezone = self.timezone;
        evaluate_rules(
            StrategyKind::Default,
            rules,
            location,
            registry,
            now,
            timezone,
            |rule, flr| self.judge(rule, flr, registry, now),
        )
    }

    fn forget_rules_except(&mut self, rules: &[Rule]) {
        self.hysteresis.retain_rules(rules.iter().map(|r| &r.id));
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
        BeaconIdentity::new(Uuid::nil(), 7, 7)
    }

    fn rule(behavior: BeaconBehavior) -> Rule {
        Rule {
            id: Uuid::from_u128(1),
            name: "desk".into(),
            is_active: true,
            gps_location: None,
            time_rules: Vec::new(),
            fine_location_rules: vec![FineLocationRule {
                id: Uuid::from_u128(2),
                beacon: beacon(),
                behavior,
                is_active: true,
            }],
            blocked_resource_ids: vec!["com.example.game".into()],
        }
    }

    fn registry() -> BeaconRegistry {
        let mut registry = BeaconRegistry::default();
        registry.register(beacon(), BeaconDevice::named("desk"), at(0));
        registry
    }

    fn detect(registry: &mut BeaconRegistry, rssi: i32, secs: i64) {
        registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(),
                rssi,
            },
            at(secs),
        );
    }

    #[test]
    fn test_presets_are_valid() {
        for preset in [
            ThresholdPreset::Default,
            ThresholdPreset::Conservative,
            ThresholdPreset::Responsive,
        ] {
            let config = preset.config();
            assert!(config.problems().is_empty(), "{preset}");
            assert!(
                config.hysteresis.blocking_threshold < config.hysteresis.unblocking_threshold,
                "{preset} has no hysteresis band"
            );
        }
        assert_eq!(
            "Conservative".parse::<ThresholdPreset>(),
            Ok(ThresholdPreset::Conservative)
        );
        assert!("fast".parse::<ThresholdPreset>().is_err());
    }

    #[test]
    fn test_reliability_gates() {
        let mut registry = registry();
        let strategy = RssiStrategy::default();

        let report = strategy.beacon_reliability(&beacon(), &registry, at(0));
        assert!(report.registered);
        assert!(!report.range_ok);
        assert!(!report.is_reliable());

        for secs in 0..=4 {
            detect(&mut registry, -55, secs);
        }
        let report = strategy.beacon_reliability(&beacon(), &registry, at(4));
        assert!(report.range_ok);
        assert_eq!(report.signal_quality, SignalQuality::Excellent);
        assert!(report.stable);
        assert!(report.presence_ok);
        assert!(report.is_reliable());
    }

    #[test]
    fn test_strict_proximity_requires_near() {
        let mut registry = registry();
        for secs in 0..=4 {
            detect(&mut registry, -78, secs);
        }
        let mut config = RssiStrategyConfig::default();
        config.minimum_signal_quality = SignalQuality::Poor;
        assert!(RssiStrategy::new(config).is_beacon_reliable(&beacon(), &registry, at(4)));

        config.use_strict_proximity = true;
        assert!(!RssiStrategy::new(config).is_beacon_reliable(&beacon(), &registry, at(4)));
    }

    #[test]
    fn test_allowed_in_unblocks_when_beacon_reliable() {
        let mut registry = registry();
        let mut strategy = RssiStrategy::default();
        let rules = [rule(BeaconBehavior::AllowedIn)];

        let result = strategy.evaluate(&rules, None, &registry, at(0));
        assert!(result.is_rule_blocking(&rules[0].id));

        for secs in 1..=5 {
            detect(&mut registry, -52, secs);
        }
        // Proximity changed at 5; held until 8.
        let result = strategy.evaluate(&rules, None, &registry, at(5));
        assert!(result.is_rule_blocking(&rules[0].id));
        let result = strategy.evaluate(&rules, None, &registry, at(8));
        assert!(!result.is_rule_blocking(&rules[0].id));

        let detail = result.detailed_results[&rules[0].id]
            .beacon_details
            .clone()
            .unwrap();
        assert!(detail.reliable);
        assert!(detail.beacon_present);
        assert_eq!(detail.hysteresis_blocked, Some(false));
    }

    #[test]
    fn test_huge_presence_window_evaluates() {
        let mut registry = registry();
        let mut strategy = RssiStrategy::new(RssiStrategyConfig {
            presence_analysis_window: Duration::from_secs(9_000_000_000_000),
            ..RssiStrategyConfig::default()
        });
        detect(&mut registry, -55, 0);

        let rules = [rule(BeaconBehavior::AllowedIn)];
        let result = strategy.evaluate(&rules, None, &registry, at(4));
        assert!(result.detailed_results.contains_key(&rules[0].id));
        assert!(strategy
            .beacon_reliability(&beacon(), &registry, at(4))
            .presence_ok);
    }

    #[test]
    fn test_blocked_in_blocks_when_present() {
        let mut registry = registry();
        let mut strategy = RssiStrategy::new(RssiStrategyConfig {
            minimum_stability_duration: Duration::ZERO,
            ..RssiStrategyConfig::default()
        });
        for secs in 0..=3 {
            detect(&mut registry, -45, secs);
        }
        let rules = [rule(BeaconBehavior::BlockedIn)];
        let result = strategy.evaluate(&rules, None, &registry, at(3));
        assert!(result.is_rule_blocking(&rules[0].id));
        assert!(result.blocked_resource_ids.contains("com.example.game"));
    }

    #[test]
    fn test_forget_rules_drops_hysteresis_memory() {
        let registry = registry();
        let mut strategy = RssiStrategy::default();
        let rules = [rule(BeaconBehavior::AllowedIn)];
        strategy.evaluate(&rules, None, &registry, at(0));
        assert!(strategy.hysteresis().state(&rules[0].id).is_some());

        strategy.forget_rules_except(&[]);
        assert!(strategy.hysteresis().state(&rules[0].id).is_none());
    }
}
