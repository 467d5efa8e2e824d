//! Evaluation output.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::StrategyKind;
use crate::beacon::{BeaconIdentity, ProximityLevel, SignalQuality};
use crate::rules::{BeaconBehavior, RuleId};

/// How one of a rule's three conditions came out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOutcome {
    /// The rule does not use this condition; it is vacuously met.
    NotConfigured,
    /// Evaluated and holds.
    Met,
    /// Evaluated and does not hold.
    NotMet,
    /// Not evaluated because an earlier condition was not met.
    Skipped,
}

impl ConditionOutcome {
    /// Whether the condition permits blocking.
    #[must_use]
    pub const fn permits_blocking(self) -> bool {
        matches!(self, Self::NotConfigured | Self::Met)
    }

    pub(crate) const fn from_bool(met: bool) -> Self {
        if met {
            Self::Met
        } else {
            Self::NotMet
        }
    }
}

/// The fine-location rule that decided a rule's beacon condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BeaconConditionDetail {
    /// The deciding fine-location rule.
    pub fine_location_rule_id: Uuid,

    /// Its beacon.
    pub beacon: BeaconIdentity,

    /// Its behavior.
    pub behavior: BeaconBehavior,

    /// Beacon proximity at evaluation time.
    pub proximity: ProximityLevel,

    /// Beacon signal quality at evaluation time.
    pub signal_quality: SignalQuality,

    /// In-range fraction of the analysis window (RSSI strategy only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_ratio: Option<f64>,

    /// Whether the region is currently entered.
    pub is_in_region: bool,

    /// Whether the strategy's reliability gate passed.
    pub reliable: bool,

    /// Whether the beacon counted as present for the decision.
    pub beacon_present: bool,

    /// Hysteresis memory after this evaluation (RSSI strategy only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hysteresis_blocked: Option<bool>,

    /// Whether the beacon condition blocks.
    pub condition_blocks: bool,
}

/// Everything known about one rule's evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DetailedRuleEvaluationResult {
    /// The rule.
    #[schema(value_type = String, format = Uuid)]
    pub rule_id: RuleId,

    /// Its display name.
    pub rule_name: String,

    /// Final decision.
    pub is_blocking: bool,

    /// GPS condition.
    pub gps: ConditionOutcome,

    /// Time condition.
    pub time: ConditionOutcome,

    /// Beacon condition.
    pub beacon: ConditionOutcome,

    /// Distance to the geofence center when it was checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,

    /// Detail for the deciding fine-location rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon_details: Option<BeaconConditionDetail>,

    /// Fine-location rules skipped because their beacon is not registered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_beacons: Vec<BeaconIdentity>,
}

impl DetailedRuleEvaluationResult {
    pub(crate) fn skipped(rule_id: RuleId, rule_name: &str) -> Self {
        Self {
            rule_id,
            rule_name: rule_name.to_string(),
            is_blocking: false,
            gps: ConditionOutcome::Skipped,
            time: ConditionOutcome::Skipped,
            beacon: ConditionOutcome::Skipped,
            distance_meters: None,
            beacon_details: None,
            unresolved_beacons: Vec::new(),
        }
    }
}

/// Output of one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "evaluated_at": "2025-01-15T10:00:00Z",
    "strategy": "default",
    "rule_blocking_status": {"5f0c6a4e-8a5c-4a39-9a57-3f2f1d4b2c10": true},
    "blocked_resource_ids": ["com.example.social"],
    "per_rule_diagnostics": {"5f0c6a4e-8a5c-4a39-9a57-3f2f1d4b2c10": "blocking: all conditions met"},
    "detailed_results": {}
}))]
pub struct RuleEvaluationResult {
    /// When the evaluation ran.
    pub evaluated_at: DateTime<Utc>,

    /// Strategy that produced the result.
    pub strategy: StrategyKind,

    /// Per-rule decision.
    #[schema(value_type = BTreeMap<String, bool>)]
    pub rule_blocking_status: BTreeMap<RuleId, bool>,

    /// Union of the blocked resources of every blocking rule.
    pub blocked_resource_ids: BTreeSet<String>,

    /// Human-readable explanation per rule.
    #[schema(value_type = BTreeMap<String, String>)]
    pub per_rule_diagnostics: BTreeMap<RuleId, String>,

    /// Structured explanation per rule.
    #[schema(value_type = BTreeMap<String, DetailedRuleEvaluationResult>)]
    pub detailed_results: BTreeMap<RuleId, DetailedRuleEvaluationResult>,
}

impl RuleEvaluationResult {
    /// A result with no rules evaluated.
    #[must_use]
    pub fn empty(strategy: StrategyKind, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            evaluated_at,
            strategy,
            rule_blocking_status: BTreeMap::new(),
            blocked_resource_ids: BTreeSet::new(),
            per_rule_diagnostics: BTreeMap::new(),
            detailed_results: BTreeMap::new(),
        }
    }

    /// Whether `rule_id` was evaluated and is blocking.
    #[must_use]
    pub fn is_rule_blocking(&self, rule_id: &RuleId) -> bool {
        self.rule_blocking_status
            .get(rule_id)
            .copied()
            .unwrap_or(false)
    }

    /// Number of blocking rules.
    #[must_use]
    pub fn blocking_rule_count(&self) -> usize {
        self.rule_blocking_status.values().filter(|b| **b).count()
    }

    /// Whether the blocked sets and per-rule decisions of two results agree.
    #[must_use]
    pub fn same_decision(&self, other: &Self) -> bool {
        self.blocked_resource_ids == other.blocked_resource_ids
            && self.rule_blocking_status == other.rule_blocking_status
    }
}
