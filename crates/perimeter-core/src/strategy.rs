//! Rule processing strategies.
//!
//! A strategy turns `(rules, location, registry, now)` into a
//! [`RuleEvaluationResult`]. Every strategy shares the same condition chain:
//!
//! 1. **GPS**: inside the rule's active geofence. Without a location fix an
//!    active geofence is not met, so the rule does not block.
//! 2. **Time**: any active time rule matches `now`.
//! 3. **Beacon**: the first active fine-location rule whose beacon is
//!    registered decides. Fine-location rules naming unregistered beacons are
//!    skipped; if none is usable the condition is not met.
//!
//! The chain short-circuits, and a rule blocks only when all three hold.
//! Strategies differ in how they decide whether a beacon counts as present:
//! [`RssiStrategy`] gates on signal reliability and smooths the decision with
//! a [`HysteresisTracker`], [`RegionStrategy`] trusts region membership.

mod hysteresis;
mod region;
mod result;
mod rssi;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

pub use hysteresis::{BlockingStateInfo, HysteresisConfig, HysteresisTracker};
pub use region::{RegionStrategy, RegionStrategyConfig};
pub use result::{
    BeaconConditionDetail, ConditionOutcome, DetailedRuleEvaluationResult, RuleEvaluationResult,
};
pub use rssi::{ReliabilityReport, RssiStrategy, RssiStrategyConfig, ThresholdPreset};

use crate::config::EngineConfig;
use crate::geo::Location;
use crate::registry::BeaconRegistry;
use crate::rules::{FineLocationRule, Rule};

/// Which strategy is active.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// RSSI reliability gate with hysteresis.
    #[default]
    Default,
    /// Region enter/exit membership.
    Region,
}

impl StrategyKind {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Region => "region",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "rssi" => Ok(Self::Default),
            "region" => Ok(Self::Region),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// Turns rules and sensor state into a blocking decision.
///
/// Implementations may keep state between calls and must be driven from one
/// owner; `evaluate` takes `&mut self` for that reason. Evaluation never fails.
pub trait RuleProcessingStrategy: Send + fmt::Debug {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Evaluate every rule at `now`.
    fn evaluate(
        &mut self,
        rules: &[Rule],
        location: Option<&Location>,
        registry: &BeaconRegistry,
        now: DateTime<Utc>,
    ) -> RuleEvaluationResult;

    /// Drop any per-rule memory for rules not in `rules`.
    fn forget_rules_except(&mut self, _rules: &[Rule]) {}
}

/// Build a fresh strategy of `kind` from a validated configuration.
#[must_use]
pub fn build_strategy(kind: StrategyKind, config: &EngineConfig) -> Box<dyn RuleProcessingStrategy> {
    let timezone = config.engine.timezone;
    match kind {
        StrategyKind::Default => {
            Box::new(RssiStrategy::new(config.rssi_strategy_config()).with_timezone(timezone))
        }
        StrategyKind::Region => {
            Box::new(RegionStrategy::new(config.region_strategy_config()).with_timezone(timezone))
        }
    }
}

/// Run the shared condition chain; `judge` decides the beacon condition.
pub(crate) fn evaluate_rules<F>(
    kind: StrategyKind,
    rules: &[Rule],
    location: Option<&Location>,
    registry: &BeaconRegistry,
    now: DateTime<Utc>,
    timezone: Tz,
    mut judge: F,
) -> RuleEvaluationResult
where
    F: FnMut(&Rule, &FineLocationRule) -> BeaconConditionDetail,
{
    let mut result = RuleEvaluationResult::empty(kind, now);

    for rule in rules {
        let (detail, diagnostic) = if rule.can_block() {
            evaluate_rule(rule, location, registry, now, timezone, &mut judge)
        } else {
            let reason = if rule.is_active {
                "not blocking: no blocked resources"
            } else {
                "not blocking: rule inactive"
            };
            (
                DetailedRuleEvaluationResult::skipped(rule.id, &rule.name),
                reason.to_string(),
            )
        };

        if detail.is_blocking {
            result
                .blocked_resource_ids
                .extend(rule.blocked_resource_ids.iter().cloned());
        }
        debug!(
            rule_id = %rule.id,
            strategy = %kind,
            blocking = detail.is_blocking,
            diagnostic = %diagnostic,
            "Evaluated rule"
        );
        result.rule_blocking_status.insert(rule.id, detail.is_blocking);
        result.per_rule_diagnostics.insert(rule.id, diagnostic);
        result.detailed_results.insert(rule.id, detail);
    }

    result
}

fn evaluate_rule<F>(
    rule: &Rule,
    location: Option<&Location>,
    registry: &BeaconRegistry,
    now: DateTime<Utc>,
    timezone: Tz,
    judge: &mut F,
) -> (DetailedRuleEvaluationResult, String)
where
    F: FnMut(&Rule, &FineLocationRule) -> BeaconConditionDetail,
{
    let mut detail = DetailedRuleEvaluationResult::skipped(rule.id, &rule.name);

    // GPS
    match rule.active_gps_location() {
        None => detail.gps = ConditionOutcome::NotConfigured,
        Some(gps) => {
            let Some(location) = location else {
                detail.gps = ConditionOutcome::NotMet;
                return (detail, "not blocking: no location fix for geofence".into());
            };
            let distance = gps.distance_to(location);
            detail.distance_meters = Some(distance);
            detail.gps = ConditionOutcome::from_bool(distance <= gps.radius_meters);
            if detail.gps == ConditionOutcome::NotMet {
                return (
                    detail,
                    format!(
                        "not blocking: outside geofence ({distance:.0} m from center, radius {:.0} m)",
                        gps.radius_meters
                    ),
                );
            }
        }
    }

    // Time
    if rule.time_rules.is_empty() {
        detail.time = ConditionOutcome::NotConfigured;
    } else {
        let matched = rule.time_rules.iter().any(|tr| tr.matches(now, timezone));
        detail.time = ConditionOutcome::from_bool(matched);
        if !matched {
            return (detail, "not blocking: outside scheduled time".into());
        }
    }

    // Beacon
    let mut active = rule.active_fine_location_rules().peekable();
    if active.peek().is_none() {
        detail.beacon = ConditionOutcome::NotConfigured;
    } else {
        let mut deciding = None;
        for flr in active {
            if registry.contains(&flr.beacon) {
                deciding = Some(flr);
                break;
            }
            warn!(
                rule_id = %rule.id,
                beacon = %flr.beacon,
                "Fine-location rule references an unregistered beacon, skipping"
            );
            detail.unresolved_beacons.push(flr.beacon);
        }

        let Some(flr) = deciding else {
            detail.beacon = ConditionOutcome::NotMet;
            return (detail, "not blocking: no registered beacon for rule".into());
        };

        let beacon_detail = judge(rule, flr);
        detail.beacon = ConditionOutcome::from_bool(beacon_detail.condition_blocks);
        let diagnostic = if beacon_detail.condition_blocks {
            None
        } else {
            Some(format!(
                "not blocking: beacon {} {} ({}, {}, {})",
                flr.beacon,
                if beacon_detail.beacon_present {
                    "present"
                } else {
                    "absent"
                },
                beacon_behavior_name(flr),
                beacon_detail.proximity,
                if beacon_detail.reliable {
                    "reliable"
                } else {
                    "unreliable"
                },
            ))
        };
        detail.beacon_details = Some(beacon_detail);
        if let Some(diagnostic) = diagnostic {
            return (detail, diagnostic);
        }
    }

    detail.is_blocking = true;
    (detail, "blocking: all conditions met".into())
}

const fn beacon_behavior_name(flr: &FineLocationRule) -> &'static str {
    match flr.behavior {
        crate::rules::BeaconBehavior::AllowedIn => "allowed in",
        crate::rules::BeaconBehavior::BlockedIn => "blocked in",
    }
}
