//! Tokio task that owns an [`Engine`].
//!
//! Sensor events, rule updates and queries are marshaled into the task over a
//! bounded `mpsc` queue, so the registry and strategy are only ever touched
//! from one place. The task evaluates on a fixed interval and, debounced,
//! after any input change; every result is published on a `watch` channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};
use utoipa::ToSchema;

use super::{Engine, EngineError};
use crate::beacon::{BeaconDevice, BeaconEvent, BeaconIdentity, BeaconStatus};
use crate::geo::Location;
use crate::registry::{DetectionStatistics, RegionState, RegionStateSource, SystemDiagnostics};
use crate::rules::Rule;
use crate::strategy::{RuleEvaluationResult, StrategyKind};

/// Point-in-time view of the engine's sensor state.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RegistrySnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Active strategy.
    pub strategy: StrategyKind,
    /// Every registered beacon, ordered by identity.
    pub beacons: Vec<BeaconStatus>,
    /// Aggregate counters.
    pub statistics: DetectionStatistics,
    /// System-level sensor state.
    pub diagnostics: SystemDiagnostics,
    /// Current location fix.
    pub location: Option<Location>,
    /// Number of rules loaded.
    pub rule_count: usize,
}

impl RegistrySnapshot {
    fn capture(engine: &Engine) -> Self {
        let registry = engine.registry();
        Self {
            taken_at: engine.now(),
            strategy: engine.strategy_kind(),
            beacons: registry.statuses().into_iter().cloned().collect(),
            statistics: registry.detection_statistics(),
            diagnostics: registry.diagnostics().clone(),
            location: engine.location().copied(),
            rule_count: engine.rules().len(),
        }
    }
}

/// Messages accepted by the runtime task.
#[derive(Debug)]
pub enum EngineCommand {
    /// One sensor event.
    Event(BeaconEvent),
    /// Sensor events applied in order as one batch.
    Events(Vec<BeaconEvent>),
    /// Register or update a beacon device.
    RegisterBeacon(BeaconIdentity, BeaconDevice),
    /// Forget a beacon.
    UnregisterBeacon(BeaconIdentity, oneshot::Sender<bool>),
    /// Replace all rules.
    ReplaceRules(Vec<Rule>),
    /// Set or clear the location fix.
    UpdateLocation(Option<Location>),
    /// Swap strategies.
    SwitchStrategy(StrategyKind),
    /// Correct region membership; replies with the number of corrections.
    SynchronizeRegions(Vec<(BeaconIdentity, RegionState)>, oneshot::Sender<usize>),
    /// Evaluate immediately and reply with the result.
    EvaluateNow(oneshot::Sender<Arc<RuleEvaluationResult>>),
    /// Reply with a registry snapshot.
    Snapshot(oneshot::Sender<RegistrySnapshot>),
}

impl EngineCommand {
    /// Whether this command changes evaluation inputs.
    const fn changes_inputs(&self) -> bool {
        !matches!(self, Self::EvaluateNow(_) | Self::Snapshot(_))
    }
}

/// Cloneable handle to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    results: watch::Receiver<Arc<RuleEvaluationResult>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Stopped)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply)).await?;
        response.await.map_err(|_| EngineError::Stopped)
    }

    /// Queue one sensor event, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn send_event(&self, event: BeaconEvent) -> Result<(), EngineError> {
        self.send(EngineCommand::Event(event)).await
    }

    /// Queue one sensor event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::QueueFull`] under backpressure, or
    /// [`EngineError::Stopped`] if the runtime has exited.
    pub fn try_send_event(&self, event: BeaconEvent) -> Result<(), EngineError> {
        self.commands
            .try_send(EngineCommand::Event(event))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => EngineError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => EngineError::Stopped,
            })
    }

    /// Queue an ordered batch of sensor events.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn send_events(&self, events: Vec<BeaconEvent>) -> Result<(), EngineError> {
        self.send(EngineCommand::Events(events)).await
    }

    /// Register or update a beacon device.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn register_beacon(
        &self,
        identity: BeaconIdentity,
        device: BeaconDevice,
    ) -> Result<(), EngineError> {
        self.send(EngineCommand::RegisterBeacon(identity, device))
            .await
    }

    /// Forget a beacon; `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn unregister_beacon(&self, identity: BeaconIdentity) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::UnregisterBeacon(identity, reply))
            .await
    }

    /// Replace all rules.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn replace_rules(&self, rules: Vec<Rule>) -> Result<(), EngineError> {
        self.send(EngineCommand::ReplaceRules(rules)).await
    }

    /// Set or clear the location fix.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn update_location(&self, location: Option<Location>) -> Result<(), EngineError> {
        self.send(EngineCommand::UpdateLocation(location)).await
    }

    /// Swap strategies.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn switch_strategy(&self, kind: StrategyKind) -> Result<(), EngineError> {
        self.send(EngineCommand::SwitchStrategy(kind)).await
    }

    /// Correct region membership from a sensor-subsystem snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn synchronize_regions(
        &self,
        snapshot: Vec<(BeaconIdentity, RegionState)>,
    ) -> Result<usize, EngineError> {
        self.request(|reply| EngineCommand::SynchronizeRegions(snapshot, reply))
            .await
    }

    /// Evaluate after every queued command has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn evaluate_now(&self) -> Result<Arc<RuleEvaluationResult>, EngineError> {
        self.request(EngineCommand::EvaluateNow).await
    }

    /// Registry snapshot after every queued command has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the runtime has exited.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, EngineError> {
        self.request(EngineCommand::Snapshot).await
    }

    /// Latest published result.
    #[must_use]
    pub fn latest(&self) -> Arc<RuleEvaluationResult> {
        Arc::clone(&self.results.borrow())
    }

    /// Receiver notified on every published result.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<RuleEvaluationResult>> {
        self.results.clone()
    }

    /// Whether the runtime is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop ticking. A running evaluation completes; queued commands are dropped.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Spawns the engine task.
#[derive(Debug)]
pub struct EngineRuntime;

impl EngineRuntime {
    /// Spawn `engine` on the current tokio runtime.
    ///
    /// The join handle yields the engine back after shutdown.
    #[must_use]
    pub fn spawn(engine: Engine) -> (EngineHandle, JoinHandle<Engine>) {
        Self::spawn_inner(engine, None)
    }

    /// Spawn after re-synchronizing region membership from `source`.
    #[must_use]
    pub fn spawn_with_region_source(
        engine: Engine,
        source: &dyn RegionStateSource,
    ) -> (EngineHandle, JoinHandle<Engine>) {
        Self::spawn_inner(engine, Some(source))
    }

    fn spawn_inner(
        mut engine: Engine,
        source: Option<&dyn RegionStateSource>,
    ) -> (EngineHandle, JoinHandle<Engine>) {
        if let Some(source) = source {
            let corrections = engine.synchronize_regions(source);
            info!(corrections, "Synchronized region membership on startup");
        }

        let capacity = engine.config().engine.event_queue_capacity.max(1);
        let (commands_tx, commands_rx) = mpsc::channel(capacity);
        let (results_tx, results_rx) = watch::channel(engine.evaluate());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = EngineHandle {
            commands: commands_tx,
            results: results_rx,
            shutdown: Arc::new(shutdown_tx),
        };
        let task = tokio::spawn(run(engine, commands_rx, results_tx, shutdown_rx));
        (handle, task)
    }
}

async fn run(
    mut engine: Engine,
    mut commands: mpsc::Receiver<EngineCommand>,
    results: watch::Sender<Arc<RuleEvaluationResult>>,
    mut shutdown: watch::Receiver<bool>,
) -> Engine {
    let period = engine.config().evaluation_interval();
    let debounce = engine.config().debounce();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The initial result is already published.
    ticker.reset();

    let mut pending: Option<Instant> = None;
    info!(
        strategy = %engine.strategy_kind(),
        interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
        "Engine runtime started"
    );

    loop {
        let deadline = pending;
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            command = commands.recv() => {
                let Some(command) = command else { break };
                if command.changes_inputs() {
                    // Past the representable deadline the periodic tick picks the change up.
                    if let Some(deadline) = Instant::now().checked_add(debounce) {
                        pending = Some(deadline);
                    }
                }
                handle_command(&mut engine, command, &results);
            }

            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                pending = None;
                publish(&mut engine, &results);
            }

            _ = ticker.tick() => {
                pending = None;
                publish(&mut engine, &results);
            }
        }
    }

    info!("Engine runtime stopped");
    engine
}

fn publish(engine: &mut Engine, results: &watch::Sender<Arc<RuleEvaluationResult>>) {
    results.send_replace(engine.evaluate());
}

fn handle_command(
    engine: &mut Engine,
    command: EngineCommand,
    results: &watch::Sender<Arc<RuleEvaluationResult>>,
) {
    match command {
        EngineCommand::Event(event) => {
            engine.apply_event(event);
        }
        EngineCommand::Events(events) => {
            debug!(count = events.len(), "Applying event batch");
            engine.apply_events(events);
        }
        EngineCommand::RegisterBeacon(identity, device) => {
            engine.register_beacon(identity, device);
        }
        EngineCommand::UnregisterBeacon(identity, reply) => {
            let _ = reply.send(engine.unregister_beacon(&identity));
        }
        EngineCommand::ReplaceRules(rules) => engine.replace_rules(rules),
        EngineCommand::UpdateLocation(location) => engine.update_location(location),
        EngineCommand::SwitchStrategy(kind) => {
            engine.switch_strategy(kind);
        }
        EngineCommand::SynchronizeRegions(snapshot, reply) => {
            let _ = reply.send(engine.apply_region_snapshot(snapshot));
        }
        EngineCommand::EvaluateNow(reply) => {
            let result = engine.evaluate();
            results.send_replace(Arc::clone(&result));
            let _ = reply.send(result);
        }
        EngineCommand::Snapshot(reply) => {
            let _ = reply.send(RegistrySnapshot::capture(engine));
        }
    }
}
