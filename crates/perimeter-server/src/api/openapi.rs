//! OpenAPI specification generation for the perimeter API.
//!
//! The document is served at `/api/openapi.json`, backs the Swagger UI, and is
//! written to disk by the `gen-openapi` binary for client generation.

use axum::Json;
use perimeter_core::beacon::RecordedEvent;
use perimeter_core::strategy::BeaconConditionDetail;
use perimeter_core::{
    AuthorizationStatus, BeaconBehavior, BeaconDevice, BeaconEvent, BeaconIdentity, BeaconStatus,
    BlockedResources, ConditionOutcome, DetailedRuleEvaluationResult, DetectionStatistics,
    FineLocationRule, GpsLocation, HealthResponse, Location, ProximityLevel, Recurrence,
    RegionState, RegistrySnapshot, Rule, RuleEvaluationResult, SignalQuality, StrategyKind,
    SystemDiagnostics, TimeRule,
};
use utoipa::OpenApi;

use super::beacons::{
    RegionMembership, RegisterBeaconRequest, RegisterBeaconResponse, SubmitEventsRequest,
    SubmitEventsResponse, SynchronizeRegionsRequest, SynchronizeRegionsResponse,
    UnregisterBeaconResponse,
};
use super::error::ErrorResponse;
use super::location::{UpdateLocationRequest, UpdateLocationResponse};
use super::rules::{ReplaceRulesRequest, ReplaceRulesResponse};
use super::strategy::{StrategyResponse, UpdateStrategyRequest};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for perimeter.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "perimeter API",
        version = "0.1.0",
        description = r#"
# perimeter API

perimeter decides which apps and sites to block based on where you are, what time it is
and which beacons are nearby.

## Overview

1. **Sensor events**: the platform bridge posts beacon ranging and region events in order
2. **Rules**: the rule store pushes the full rule set whenever it changes
3. **Location**: the latest GPS fix feeds geofence conditions
4. **Decisions**: the engine evaluates on a fixed interval and shortly after every input
   change; enforcement reads `/api/blocked`

## Failure behavior

A rule only blocks when every configured condition is positively met. Missing location
fixes, unregistered beacons and unreliable signals all resolve to "not blocking".
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local perimeter server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "evaluation", description = "Blocking decisions and per-rule diagnostics"),
        (name = "beacons", description = "Beacon registration, sensor events and region membership"),
        (name = "rules", description = "Rule set replacement"),
        (name = "location", description = "GPS fix used by geofence conditions"),
        (name = "strategy", description = "Rule processing strategy selection")
    ),
    paths(
        super::health::health_check,
        super::evaluation::get_evaluation,
        super::evaluation::evaluate_now,
        super::evaluation::get_blocked,
        super::beacons::get_beacons,
        super::beacons::register_beacon,
        super::beacons::unregister_beacon,
        super::beacons::submit_events,
        super::beacons::synchronize_regions,
        super::rules::replace_rules,
        super::location::update_location,
        super::strategy::get_strategy,
        super::strategy::update_strategy,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            HealthResponse,
            // Evaluation types
            RuleEvaluationResult,
            DetailedRuleEvaluationResult,
            BeaconConditionDetail,
            ConditionOutcome,
            BlockedResources,
            StrategyKind,
            // Beacon types
            BeaconIdentity,
            BeaconDevice,
            BeaconEvent,
            BeaconStatus,
            AuthorizationStatus,
            ProximityLevel,
            SignalQuality,
            RecordedEvent,
            RegionState,
            RegistrySnapshot,
            DetectionStatistics,
            SystemDiagnostics,
            RegisterBeaconRequest,
            RegisterBeaconResponse,
            UnregisterBeaconResponse,
            SubmitEventsRequest,
            SubmitEventsResponse,
            RegionMembership,
            SynchronizeRegionsRequest,
            SynchronizeRegionsResponse,
            // Rule types
            Rule,
            GpsLocation,
            TimeRule,
            Recurrence,
            FineLocationRule,
            BeaconBehavior,
            ReplaceRulesRequest,
            ReplaceRulesResponse,
            // Location types
            Location,
            UpdateLocationRequest,
            UpdateLocationResponse,
            // Strategy types
            StrategyResponse,
            UpdateStrategyRequest,
        )
    )
)]
pub struct ApiDoc;
