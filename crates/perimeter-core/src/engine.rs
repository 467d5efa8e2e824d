//! The decision engine.
//!
//! [`Engine`] owns the beacon registry, the active strategy, the current rules
//! and the latest location fix, and reads time from an injected [`Clock`]. It
//! is synchronous and single-owner; [`EngineRuntime`] wraps it in a tokio task
//! that serializes sensor events, rule updates and evaluations.

mod runtime;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

pub use runtime::{EngineCommand, EngineHandle, EngineRuntime, RegistrySnapshot};

use crate::beacon::{BeaconDevice, BeaconEvent, BeaconIdentity};
use crate::clock::Clock;
use crate::config::{ConfigError, EngineConfig};
use crate::geo::Location;
use crate::registry::{BeaconRegistry, EventDisposition, RegionState, RegionStateSource};
use crate::rules::Rule;
use crate::strategy::{build_strategy, RuleEvaluationResult, RuleProcessingStrategy, StrategyKind};

/// Errors from the engine runtime's command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The runtime task has exited.
    #[error("engine runtime is stopped")]
    Stopped,

    /// The command queue is full.
    #[error("engine command queue is full")]
    QueueFull,
}

/// Registry, strategy and inputs for one user.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    registry: BeaconRegistry,
    strategy: Box<dyn RuleProcessingStrategy>,
    rules: Vec<Rule>,
    location: Option<Location>,
    last_result: Option<Arc<RuleEvaluationResult>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("strategy", &self.strategy.kind())
            .field("beacons", &self.registry.len())
            .field("rules", &self.rules.len())
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine with the configured startup strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let strategy = build_strategy(config.engine.strategy, &config);
        info!(strategy = %strategy.kind(), timezone = %config.engine.timezone, "Engine created");

        Ok(Self {
            registry: BeaconRegistry::new(config.proximity),
            strategy,
            config,
            clock,
            rules: Vec::new(),
            location: None,
            last_result: None,
        })
    }

    // -------------------------------------------------------------------------
    // Inputs
    // -------------------------------------------------------------------------

    /// Register a beacon device, or update its metadata.
    pub fn register_beacon(&mut self, identity: BeaconIdentity, device: BeaconDevice) {
        let now = self.clock.now();
        self.registry.register(identity, device, now);
    }

    /// Forget a beacon. Returns `false` if it was not registered.
    pub fn unregister_beacon(&mut self, identity: &BeaconIdentity) -> bool {
        self.registry.unregister(identity).is_some()
    }

    /// Apply one sensor event.
    pub fn apply_event(&mut self, event: BeaconEvent) -> EventDisposition {
        let now = self.clock.now();
        self.registry.process_event(event, now)
    }

    /// Apply a batch of sensor events in order.
    pub fn apply_events(&mut self, events: Vec<BeaconEvent>) -> Vec<EventDisposition> {
        let now = self.clock.now();
        self.registry.process_events(events, now)
    }

    /// Replace the rule set. Hysteresis memory for removed rules is dropped.
    pub fn replace_rules(&mut self, rules: Vec<Rule>) {
        for rule in &rules {
            if let Err(err) = rule.validate() {
                warn!(rule_id = %rule.id, error = %err, "Accepted rule that fails validation");
            }
        }
        self.strategy.forget_rules_except(&rules);
        debug!(count = rules.len(), "Replaced rules");
        self.rules = rules;
    }

    /// Set or clear the current location fix.
    ///
    /// An out-of-range coordinate is discarded, so geofenced rules fail closed.
    pub fn update_location(&mut self, location: Option<Location>) {
        self.location = match location {
            Some(location) if !location.is_valid() => {
                warn!(
                    latitude = location.latitude,
                    longitude = location.longitude,
                    "Discarding invalid location fix"
                );
                None
            }
            other => other,
        };
    }

    /// Swap to a fresh strategy of `kind`. Returns `false` if already active.
    ///
    /// The new strategy starts without hysteresis memory.
    pub fn switch_strategy(&mut self, kind: StrategyKind) -> bool {
        let current = self.strategy.kind();
        if current == kind {
            return false;
        }
        self.strategy = build_strategy(kind, &self.config);
        info!(from = %current, to = %kind, "Switched rule processing strategy");
        true
    }

    /// Re-query region membership from the sensor subsystem and correct the registry.
    pub fn synchronize_regions(&mut self, source: &dyn RegionStateSource) -> usize {
        self.apply_region_snapshot(source.current_region_states())
    }

    /// Correct region membership from an already fetched snapshot.
    pub fn apply_region_snapshot(&mut self, snapshot: Vec<(BeaconIdentity, RegionState)>) -> usize {
        let now = self.clock.now();
        self.registry.synchronize_regions(snapshot, now)
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Evaluate every rule now and remember the result.
    pub fn evaluate(&mut self) -> Arc<RuleEvaluationResult> {
        let now = self.clock.now();
        let result = Arc::new(self.strategy.evaluate(
            &self.rules,
            self.location.as_ref(),
            &self.registry,
            now,
        ));

        let changed = self
            .last_result
            .as_ref()
            .map_or(true, |previous| !previous.same_decision(&result));
        if changed {
            info!(
                strategy = %result.strategy,
                blocking_rules = result.blocking_rule_count(),
                blocked_resources = result.blocked_resource_ids.len(),
                "Blocking decision changed"
            );
        }

        self.last_result = Some(Arc::clone(&result));
        result
    }

    /// Most recent evaluation, if any.
    #[must_use]
    pub const fn last_result(&self) -> Option<&Arc<RuleEvaluationResult>> {
        self.last_result.as_ref()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Beacon registry.
    #[must_use]
    pub const fn registry(&self) -> &BeaconRegistry {
        &self.registry
    }

    /// Current rules.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Current location fix.
    #[must_use]
    pub const fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Active strategy.
    #[must_use]
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}
