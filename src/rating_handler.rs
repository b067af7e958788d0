use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::caller::Caller;
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::{
    CreateRatingPayload, QuestionHistory, QuestionHistoryQuery, QuestionListQuery,
    RatingQuestion, RatingResponse, RatingSummary, TargetKey, UpdateRatingPayload,
};

/// POST /ratings
///
/// Stores a rating and recomputes the target's average before responding.
pub async fn submit_rating(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(payload): Json<CreateRatingPayload>,
) -> Result<(StatusCode, Json<RatingResponse>), AppError> {
    tracing::info!(
        "POST /ratings - target {:?} ({:?})",
        payload.target_id,
        payload.target_role
    );

    let stored = state
        .ratings
        .submit(&caller, &payload)
        .await
        .inspect_err(|e| tracing::warn!("Rating rejected: {}", e))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// PATCH /ratings/:id (administrative)
pub async fn update_rating(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRatingPayload>,
) -> Result<Json<RatingResponse>, AppError> {
    Ok(Json(state.ratings.update(&caller, id, &payload).await?))
}

/// DELETE /ratings/:id (administrative)
///
/// Returns the target's average after the rating was removed.
pub async fn delete_rating(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let average = state.ratings.delete(&caller, id).await?;
    Ok(Json(json!({
        "deleted": id,
        "targetAverage": average,
    })))
}

/// GET /agents/:id/ratings
pub async fn agent_ratings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RatingSummary>, AppError> {
    Ok(Json(state.ratings.summary(id).await?))
}

/// GET /rating-questions?role=
pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuestionListQuery>,
) -> Result<Json<Vec<RatingQuestion>>, AppError> {
    let questions = state.ratings.active_questions(query.role).await?;
    Ok(Json((*questions).clone()))
}

/// GET /rating-questions/:id/scores?targetId=&targetRole=
///
/// `targetRole` defaults to the role of the representative named by `targetId`.
pub async fn question_scores(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<Uuid>,
    Query(query): Query<QuestionHistoryQuery>,
) -> Result<Json<QuestionHistory>, AppError> {
    let target = match (query.target_id, query.target_role) {
        (None, _) => None,
        (Some(id), Some(role)) => Some(TargetKey::new(id, role)),
        (Some(id), None) => {
            let rep = state
                .directory
                .get_representative(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Representative {} not found", id)))?;
            Some(TargetKey::new(rep.id, rep.role))
        }
    };

    Ok(Json(state.ratings.question_history(question_id, target).await?))
}
