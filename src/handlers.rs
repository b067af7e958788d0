use crate::caller::Caller;
use crate::config::Config;
use crate::callback_workflow::CallbackWorkflow;
use crate::errors::AppError;
use crate::geo::{self, BoundingBox, Coordinate};
use crate::models::*;
use crate::notifier::CallbackNotifier;
use crate::rating_aggregator::RatingAggregator;
use crate::store::{AgentDirectory, CallbackStore, RatingStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Representative profiles, locations and availability.
    pub directory: Arc<dyn AgentDirectory>,
    /// Callback request lifecycle.
    pub workflow: CallbackWorkflow,
    /// Rating submission and per-target aggregation.
    pub ratings: RatingAggregator,
    /// Outbound callback events (optional).
    pub notifier: Option<CallbackNotifier>,
}

impl AppState {
    /// Wires the workflow and aggregator on top of the given stores.
    pub fn new(
        config: Config,
        directory: Arc<dyn AgentDirectory>,
        callbacks: Arc<dyn CallbackStore>,
        ratings: Arc<dyn RatingStore>,
        notifier: Option<CallbackNotifier>,
    ) -> Self {
        let workflow = CallbackWorkflow::new(directory.clone(), callbacks, config.completion_policy);
        let ratings = RatingAggregator::new(ratings, directory.clone(), config.question_cache_ttl);
        Self {
            config,
            directory,
            workflow,
            ratings,
            notifier,
        }
    }

    /// Fires a callback event if a notifier is configured.
    pub fn notify(&self, request: &CallbackRequest) {
        if let Some(notifier) = &self.notifier {
            notifier.spawn_notify(crate::notifier::event_for(request), request.clone());
        }
    }
}

/// Health check endpoint.
///
/// Returns the service status, version, and health information.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rep-callback-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /agents/nearby
///
/// Ranks available representatives around `(lat, lon)`. `radiusKm` and
/// `limit` fall back to the configured defaults; `limit` is clamped to the
/// configured maximum.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `params` - Query parameters: `lat`, `lon`, optional `radiusKm` and `limit`.
pub async fn nearby_agents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyRepresentative>>, AppError> {
    tracing::info!("GET /agents/nearby - params: {:?}", params);

    let lat = params.lat.ok_or(AppError::MissingField("lat"))?;
    let lon = params.lon.ok_or(AppError::MissingField("lon"))?;
    let origin = Coordinate::new(lat, lon).map_err(|e| {
        tracing::warn!("Rejected search origin: {}", e);
        AppError::from(e)
    })?;

    let radius_km = params
        .radius_km
        .unwrap_or(state.config.default_search_radius_km);
    if !radius_km.is_finite() {
        return Err(AppError::Validation(
            "radiusKm must be a finite number".to_string(),
        ));
    }
    let limit = params
        .limit
        .unwrap_or(state.config.default_search_limit)
        .min(state.config.max_search_limit);

    if radius_km <= 0.0 || limit <= 0 {
        return Ok(Json(Vec::new()));
    }

    let area = BoundingBox::around(origin, radius_km);
    let candidates = state.directory.search_candidates(&area).await?;
    let candidate_count = candidates.len();
    let hits = geo::find_nearby(candidates, origin, radius_km, limit);

    tracing::info!(
        "Nearby search returned {} of {} candidates within {} km",
        hits.len(),
        candidate_count,
        radius_km
    );

    Ok(Json(hits))
}

/// GET /agents/:id
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Representative>, AppError> {
    let rep = state
        .directory
        .get_representative(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Representative {} not found", id)))?;
    Ok(Json(rep))
}

/// PUT /agents/:id/location
///
/// Records a new location for the representative; owner or admin only.
pub async fn update_location(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<LocationUpdate>,
) -> Result<Json<Representative>, AppError> {
    caller.ensure_may_act_for(id, "representative location")?;

    let lat = payload.latitude.ok_or(AppError::MissingField("latitude"))?;
    let lon = payload.longitude.ok_or(AppError::MissingField("longitude"))?;
    let location = Coordinate::new(lat, lon)?;

    let rep = state
        .directory
        .update_location(id, location, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Representative {} not found", id)))?;

    tracing::info!("Representative {} moved to ({}, {})", id, lat, lon);
    Ok(Json(rep))
}

/// PUT /agents/:id/availability
pub async fn update_availability(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<AvailabilityUpdate>,
) -> Result<Json<Representative>, AppError> {
    caller.ensure_may_act_for(id, "representative availability")?;

    let rep = state
        .directory
        .set_availability(id, payload.available)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Representative {} not found", id)))?;

    tracing::info!("Representative {} availability set to {}", id, payload.available);
    Ok(Json(rep))
}
