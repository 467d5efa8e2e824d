//! Beacon endpoints.
//!
//! The sensor bridge posts ranging and region events here in the order the
//! platform delivered them. The device list collaborator registers and
//! removes beacons, and after a restart pushes the platform's authoritative
//! region membership so the registry can catch up on missed transitions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use perimeter_core::{
    BeaconDevice, BeaconEvent, BeaconIdentity, PerimeterError, RegionState, RegistrySnapshot,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the beacons router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_beacons).post(register_beacon))
        .route("/{identity}", delete(unregister_beacon))
        .route("/events", post(submit_events))
        .route("/regions", put(synchronize_regions))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to register a beacon or update its metadata.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "beacon": {"uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e", "major": 100, "minor": 7},
    "device": {"name": "Desk beacon", "placement": "Office"}
}))]
pub struct RegisterBeaconRequest {
    /// Beacon identity.
    pub beacon: BeaconIdentity,

    /// Device metadata.
    pub device: BeaconDevice,
}

/// Response after registering a beacon.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterBeaconResponse {
    /// Whether the registration was queued.
    pub success: bool,

    /// Identity in `UUID:major:minor` form, usable in the delete path.
    #[schema(example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e:100:7")]
    pub identity: String,
}

/// Response after removing a beacon.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnregisterBeaconResponse {
    /// Whether the beacon was removed.
    pub success: bool,

    /// Identity that was removed.
    #[schema(example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e:100:7")]
    pub identity: String,
}

/// An ordered batch of sensor events.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "events": [
        {"type": "region_entered", "beacon": {"uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e", "major": 100, "minor": 7}},
        {"type": "detected", "beacon": {"uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e", "major": 100, "minor": 7}, "rssi": -62}
    ]
}))]
pub struct SubmitEventsRequest {
    /// Events in delivery order.
    pub events: Vec<BeaconEvent>,
}

/// Response after queueing sensor events.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitEventsResponse {
    /// Number of events queued.
    #[schema(example = 2)]
    pub accepted: usize,
}

/// Region membership of one beacon as the sensor subsystem reports it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegionMembership {
    /// The beacon.
    pub beacon: BeaconIdentity,

    /// Whether the device is inside the beacon's region.
    pub state: RegionState,
}

/// The sensor subsystem's current region membership.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "regions": [
        {"beacon": {"uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e", "major": 100, "minor": 7}, "state": "inside"}
    ]
}))]
pub struct SynchronizeRegionsRequest {
    /// Membership per beacon. Beacons left out are not changed.
    pub regions: Vec<RegionMembership>,
}

/// Response after region re-synchronization.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SynchronizeRegionsResponse {
    /// Number of beacons whose membership was corrected.
    #[schema(example = 1)]
    pub corrections: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get every registered beacon with aggregate statistics.
#[utoipa::path(
    get,
    path = "/api/beacons",
    tag = "beacons",
    operation_id = "getBeacons",
    summary = "Get beacon status",
    description = "Returns a snapshot of every registered beacon, detection statistics \
        and system-level sensor diagnostics, taken after all queued events were applied.",
    responses(
        (status = 200, description = "Registry snapshot", body = RegistrySnapshot),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn get_beacons(State(state): State<SharedState>) -> ApiResult<Json<RegistrySnapshot>> {
    let snapshot = state.engine().snapshot().await?;
    Ok(Json(snapshot))
}

/// Register a beacon.
#[utoipa::path(
    post,
    path = "/api/beacons",
    tag = "beacons",
    operation_id = "registerBeacon",
    summary = "Register a beacon",
    description = "Adds a beacon to the registry, or replaces its device metadata if it \
        is already registered. Tracked signal state is kept on re-registration.",
    request_body = RegisterBeaconRequest,
    responses(
        (status = 201, description = "Beacon registered", body = RegisterBeaconResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn register_beacon(
    State(state): State<SharedState>,
    Json(request): Json<RegisterBeaconRequest>,
) -> ApiResult<(StatusCode, Json<RegisterBeaconResponse>)> {
    state
        .engine()
        .register_beacon(request.beacon, request.device)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterBeaconResponse {
            success: true,
            identity: request.beacon.to_string(),
        }),
    ))
}

/// Remove a beacon.
#[utoipa::path(
    delete,
    path = "/api/beacons/{identity}",
    tag = "beacons",
    operation_id = "unregisterBeacon",
    summary = "Unregister a beacon",
    description = "Removes a beacon and its tracked state. Later events for it are dropped \
        and rules referring to it fail closed.",
    params(
        ("identity" = String, Path, description = "Beacon identity as UUID:major:minor",
            example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e:100:7")
    ),
    responses(
        (status = 200, description = "Beacon removed", body = UnregisterBeaconResponse),
        (status = 400, description = "Malformed identity", body = super::error::ErrorResponse),
        (status = 404, description = "Beacon not registered", body = super::error::ErrorResponse)
    )
)]
pub async fn unregister_beacon(
    State(state): State<SharedState>,
    Path(identity): Path<String>,
) -> ApiResult<Json<UnregisterBeaconResponse>> {
    let beacon: BeaconIdentity = identity.parse()?;

    if !state.engine().unregister_beacon(beacon).await? {
        return Err(ApiError::from(PerimeterError::BeaconNotRegistered(
            beacon.to_string(),
        )));
    }

    Ok(Json(UnregisterBeaconResponse {
        success: true,
        identity: beacon.to_string(),
    }))
}

/// Queue sensor events.
#[utoipa::path(
    post,
    path = "/api/beacons/events",
    tag = "beacons",
    operation_id = "submitEvents",
    summary = "Submit sensor events",
    description = "Queues an ordered batch of ranging, region and system events. Events \
        are applied in order; events for unregistered beacons are dropped. An \
        evaluation follows after the debounce interval.",
    request_body = SubmitEventsRequest,
    responses(
        (status = 202, description = "Events queued", body = SubmitEventsResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn submit_events(
    State(state): State<SharedState>,
    Json(request): Json<SubmitEventsRequest>,
) -> ApiResult<(StatusCode, Json<SubmitEventsResponse>)> {
    let accepted = request.events.len();
    if accepted > 0 {
        state.engine().send_events(request.events).await?;
    }
    debug!(accepted, "Queued sensor events");

    Ok((StatusCode::ACCEPTED, Json(SubmitEventsResponse { accepted })))
}

/// Re-synchronize region membership.
#[utoipa::path(
    put,
    path = "/api/beacons/regions",
    tag = "beacons",
    operation_id = "synchronizeRegions",
    summary = "Synchronize region membership",
    description = "Compares the sensor subsystem's current region membership with the \
        registry and applies an enter or exit only where they disagree. Use after a \
        restart, when transitions may have been missed.",
    request_body = SynchronizeRegionsRequest,
    responses(
        (status = 200, description = "Membership synchronized", body = SynchronizeRegionsResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn synchronize_regions(
    State(state): State<SharedState>,
    Json(request): Json<SynchronizeRegionsRequest>,
) -> ApiResult<Json<SynchronizeRegionsResponse>> {
    let snapshot = request
        .regions
        .into_iter()
        .map(|membership| (membership.beacon, membership.state))
        .collect();
    let corrections = state.engine().synchronize_regions(snapshot).await?;

    Ok(Json(SynchronizeRegionsResponse { corrections }))
}
