use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::caller::Caller;
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::{
    CallbackListQuery, CallbackRequest, CreateCallbackPayload, UpdateCallbackPayload,
};

/// POST /callbacks
///
/// Creates a `pending` callback request for an available representative.
pub async fn create_callback(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(payload): Json<CreateCallbackPayload>,
) -> Result<(StatusCode, Json<CallbackRequest>), AppError> {
    tracing::info!(
        "POST /callbacks - representative {:?}",
        payload.representative_id
    );

    let created = state
        .workflow
        .create(&caller, &payload, state.config.phone_region)
        .await
        .inspect_err(|e| tracing::warn!("Callback request rejected: {}", e))?;

    state.notify(&created);
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /callbacks/:id
pub async fn get_callback(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<CallbackRequest>, AppError> {
    Ok(Json(state.workflow.get(&caller, id).await?))
}

/// PATCH /callbacks/:id
///
/// Applies the transition matching `status`. Only the owning representative
/// or an administrator may call this.
pub async fn update_callback(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCallbackPayload>,
) -> Result<Json<CallbackRequest>, AppError> {
    tracing::info!("PATCH /callbacks/{} - status {}", id, payload.status);

    let updated = state
        .workflow
        .update_status(
            &caller,
            id,
            payload.status,
            payload.scheduled_at,
            payload.notes,
        )
        .await
        .inspect_err(|e| tracing::warn!("Callback {} not updated: {}", id, e))?;

    state.notify(&updated);
    Ok(Json(updated))
}

/// GET /agents/:id/callbacks?status=
pub async fn list_agent_callbacks(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Query(query): Query<CallbackListQuery>,
) -> Result<Json<Vec<CallbackRequest>>, AppError> {
    let found = state
        .workflow
        .list_for_representative(&caller, id, query.status)
        .await?;
    Ok(Json(found))
}
