use axum::{
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;

use crate::callback_handler;
use crate::handlers::{self, AppState};
use crate::rating_handler;

/// Every API route, without the transport layers `main` puts around them.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Discovery and representative self-service
        .route("/agents/nearby", get(handlers::nearby_agents))
        .route("/agents/:id", get(handlers::get_agent))
        .route("/agents/:id/location", put(handlers::update_location))
        .route("/agents/:id/availability", put(handlers::update_availability))
        .route(
            "/agents/:id/callbacks",
            get(callback_handler::list_agent_callbacks),
        )
        .route("/agents/:id/ratings", get(rating_handler::agent_ratings))
        // Callback lifecycle
        .route("/callbacks", post(callback_handler::create_callback))
        .route(
            "/callbacks/:id",
            get(callback_handler::get_callback).patch(callback_handler::update_callback),
        )
        // Ratings
        .route("/ratings", post(rating_handler::submit_rating))
        .route(
            "/ratings/:id",
            patch(rating_handler::update_rating).delete(rating_handler::delete_rating),
        )
        .route("/rating-questions", get(rating_handler::list_questions))
        .route(
            "/rating-questions/:id/scores",
            get(rating_handler::question_scores),
        )
}

/// Health check plus the API, ready for `with_state`.
pub fn app_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes())
}
