//! Persistence contracts consumed by the core components.
//!
//! Postgres implementations live in `pg_store`, in-memory ones in
//! `memory_store`. Implementations enforce their own per-call timeouts and
//! report them as [`AppError::Unavailable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::callback_workflow::CallbackTransition;
use crate::errors::AppError;
use crate::geo::{BoundingBox, Coordinate};
use crate::models::{
    CallbackRequest, CallbackStatus, NewCallbackRequest, NewRating, QuestionHistoryEntry,
    QuestionRating, Rating, RatingQuestion, Representative, TargetKey, TargetRole,
};

/// Read/write access to representatives' location and availability.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn get_representative(&self, id: Uuid) -> Result<Option<Representative>, AppError>;

    /// Representatives whose recorded location falls inside `area`.
    ///
    /// Implementations may return extra rows; the caller does the exact
    /// filtering and ranking.
    async fn search_candidates(&self, area: &BoundingBox) -> Result<Vec<Representative>, AppError>;

    async fn update_location(
        &self,
        id: Uuid,
        location: Coordinate,
        at: DateTime<Utc>,
    ) -> Result<Option<Representative>, AppError>;

    async fn set_availability(
        &self,
        id: Uuid,
        available: bool,
    ) -> Result<Option<Representative>, AppError>;
}

/// Persistence for callback requests.
#[async_trait]
pub trait CallbackStore: Send + Sync {
    async fn insert_callback(&self, new: NewCallbackRequest) -> Result<CallbackRequest, AppError>;

    async fn get_callback(&self, id: Uuid) -> Result<Option<CallbackRequest>, AppError>;

    /// Writes every field of `transition` iff the stored status still equals
    /// `transition.from`. Returns `None` when the row is missing or its status moved.
    async fn apply_transition(
        &self,
        id: Uuid,
        transition: &CallbackTransition,
    ) -> Result<Option<CallbackRequest>, AppError>;

    async fn callbacks_for_representative(
        &self,
        representative_id: Uuid,
        status: Option<CallbackStatus>,
    ) -> Result<Vec<CallbackRequest>, AppError>;
}

/// Unit of work over a single target's ratings.
///
/// Holds the target's lock from `begin` until `commit` or drop. Dropping
/// without committing discards every change.
#[async_trait]
pub trait RatingTx: Send {
    async fn insert_rating(
        &mut self,
        rating: NewRating,
    ) -> Result<(Rating, Vec<QuestionRating>), AppError>;

    async fn find_rating(&mut self, id: Uuid) -> Result<Option<Rating>, AppError>;

    async fn update_rating(
        &mut self,
        id: Uuid,
        score: i16,
        comment: Option<String>,
    ) -> Result<Option<Rating>, AppError>;

    async fn delete_rating(&mut self, id: Uuid) -> Result<Option<Rating>, AppError>;

    /// Scores of every rating of the locked target, including uncommitted changes.
    async fn target_scores(&mut self) -> Result<Vec<i16>, AppError>;

    /// Stores the derived average on the target; `None` clears it.
    async fn write_average(&mut self, average: Option<f64>) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// Persistence for ratings, question ratings and rating questions.
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Opens a unit of work on `target`, waiting for any other open unit on
    /// the same target. Fails with `NotFound` if the target does not exist
    /// with that role.
    async fn begin(&self, target: TargetKey) -> Result<Box<dyn RatingTx>, AppError>;

    async fn get_rating(&self, id: Uuid) -> Result<Option<Rating>, AppError>;

    async fn ratings_for_target(&self, target: TargetKey) -> Result<Vec<Rating>, AppError>;

    async fn question_ratings(&self, rating_id: Uuid) -> Result<Vec<QuestionRating>, AppError>;

    async fn question_history(
        &self,
        question_id: Uuid,
        target: Option<TargetKey>,
    ) -> Result<Vec<QuestionHistoryEntry>, AppError>;

    /// Active questions for `role`, ordered by display order.
    async fn active_questions(&self, role: TargetRole) -> Result<Vec<RatingQuestion>, AppError>;

    async fn get_question(&self, id: Uuid) -> Result<Option<RatingQuestion>, AppError>;

    /// Every representative, rated or not, as a target key.
    async fn all_targets(&self) -> Result<Vec<TargetKey>, AppError>;
}
