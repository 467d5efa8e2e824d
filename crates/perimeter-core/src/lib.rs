//! # perimeter-core
//!
//! Rule evaluation core for the perimeter context-aware access-control engine.
//!
//! Given user-defined rules combining a GPS geofence, time-of-day windows and
//! proximity beacons, the core continuously decides which resources should be
//! blocked. It reconciles noisy RSSI samples, region enter/exit events and GPS
//! fixes into a stable per-rule decision without flapping.
//!
//! ## Architecture
//!
//! - [`beacon`] - Beacon identities, sensor events, proximity classification and per-beacon state
//! - [`registry`] - The single owner of beacon state and the derived in-range sets
//! - [`rules`] - Rule model, geofences, time windows and validation
//! - [`strategy`] - Rule processing strategies and the hysteresis state machine
//! - [`engine`] - Synchronous engine plus its tokio runtime and handle
//! - [`config`] - Configuration loading, saving and validation
//! - [`clock`] - Injected time source
//! - [`geo`] - Great-circle distance
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared response types and OpenAPI schemas
//!
//! ## Data flow
//!
//! Sensor layer → [`BeaconEvent`] → [`BeaconRegistry`] → strategy evaluation on
//! a tick or after an input change → [`RuleEvaluationResult`] published to the
//! enforcement and UI layers.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod beacon;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod registry;
pub mod rules;
pub mod strategy;
pub mod types;

// Re-export primary types for convenience
pub use beacon::{
    AuthorizationStatus, BeaconDevice, BeaconEvent, BeaconIdentity, BeaconRegion, BeaconStatus,
    ProximityCalibration, ProximityLevel, ProximitySample, SignalQuality, EVENT_HISTORY_LIMIT,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError, EngineHandle, EngineRuntime, RegistrySnapshot};
pub use error::{PerimeterError, Result};
pub use geo::Location;
pub use registry::{
    BeaconRegistry, DetectionStatistics, EventDisposition, RegionState, RegionStateSource,
    SystemDiagnostics,
};
pub use rules::{
    BeaconBehavior, FineLocationRule, GpsLocation, Recurrence, Rule, RuleId, TimeOfDay, TimeRule,
};
pub use strategy::{
    build_strategy, ConditionOutcome, DetailedRuleEvaluationResult, RegionStrategy,
    RuleEvaluationResult, RuleProcessingStrategy, RssiStrategy, StrategyKind, ThresholdPreset,
};
pub use types::{BlockedResources, HealthResponse};
