//! Postgres implementations of the store contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::callback_workflow::CallbackTransition;
use crate::circuit_breaker::StoreGuard;
use crate::errors::AppError;
use crate::geo::{BoundingBox, Coordinate};
use crate::models::{
    CallbackRequest, CallbackStatus, NewCallbackRequest, NewRating, QuestionHistoryEntry,
    QuestionRating, Rating, RatingQuestion, Representative, TargetKey, TargetRole,
};
use crate::store::{AgentDirectory, CallbackStore, RatingStore, RatingTx};

/// Postgres-backed directory, callback store and rating store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    guard: StoreGuard,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self {
            pool,
            guard: StoreGuard::new(timeout),
        }
    }
}

#[async_trait]
impl AgentDirectory for PgStore {
    async fn get_representative(&self, id: Uuid) -> Result<Option<Representative>, AppError> {
        self.guard
            .run(
                "get representative",
                sqlx::query_as::<_, Representative>("SELECT * FROM representatives WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await
    }

    async fn search_candidates(&self, area: &BoundingBox) -> Result<Vec<Representative>, AppError> {
        let (min_lon, max_lon) = match area.longitude_range {
            Some((min, max)) => (Some(min), Some(max)),
            None => (None, None),
        };

        self.guard
            .run(
                "search candidates",
                sqlx::query_as::<_, Representative>(
                    r#"
                    SELECT * FROM representatives
                    WHERE is_available AND is_approved AND is_active
                      AND latitude IS NOT NULL AND longitude IS NOT NULL
                      AND latitude BETWEEN $1 AND $2
                      AND ($3::float8 IS NULL OR longitude BETWEEN $3 AND $4)
                    "#,
                )
                .bind(area.min_latitude)
                .bind(area.max_latitude)
                .bind(min_lon)
                .bind(max_lon)
                .fetch_all(&self.pool),
            )
            .await
    }

    async fn update_location(
        &self,
        id: Uuid,
        location: Coordinate,
        at: DateTime<Utc>,
    ) -> Result<Option<Representative>, AppError> {
        self.guard
            .run(
                "update location",
                sqlx::query_as::<_, Representative>(
                    r#"
                    UPDATE representatives
                    SET latitude = $2, longitude = $3, location_updated_at = $4
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(location.latitude())
                .bind(location.longitude())
                .bind(at)
                .fetch_optional(&self.pool),
            )
            .await
    }

    async fn set_availability(
        &self,
        id: Uuid,
        available: bool,
    ) -> Result<Option<Representative>, AppError> {
        self.guard
            .run(
                "set availability",
                sqlx::query_as::<_, Representative>(
                    "UPDATE representatives SET is_available = $2 WHERE id = $1 RETURNING *",
                )
                .bind(id)
                .bind(available)
                .fetch_optional(&self.pool),
            )
            .await
    }
}

#[async_trait]
impl CallbackStore for PgStore {
    async fn insert_callback(&self, new: NewCallbackRequest) -> Result<CallbackRequest, AppError> {
        self.guard
            .run(
                "insert callback",
                sqlx::query_as::<_, CallbackRequest>(
                    r#"
                    INSERT INTO callback_requests (
                        id, representative_id, requester_id, requester_name,
                        requester_phone, requester_email, purpose, status
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(new.representative_id)
                .bind(new.requester_id)
                .bind(&new.requester_name)
                .bind(&new.requester_phone)
                .bind(&new.requester_email)
                .bind(&new.purpose)
                .fetch_one(&self.pool),
            )
            .await
    }

    async fn get_callback(&self, id: Uuid) -> Result<Option<CallbackRequest>, AppError> {
        self.guard
            .run(
                "get callback",
                sqlx::query_as::<_, CallbackRequest>("SELECT * FROM callback_requests WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        transition: &CallbackTransition,
    ) -> Result<Option<CallbackRequest>, AppError> {
        // Single conditional UPDATE: status and timestamps land together or not at all.
        self.guard
            .run(
                "apply callback transition",
                sqlx::query_as::<_, CallbackRequest>(
                    r#"
                    UPDATE callback_requests
                    SET status = $3, scheduled_at = $4, completed_at = $5, notes = $6,
                        updated_at = now()
                    WHERE id = $1 AND status = $2
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(transition.from)
                .bind(transition.to)
                .bind(transition.scheduled_at)
                .bind(transition.completed_at)
                .bind(&transition.notes)
                .fetch_optional(&self.pool),
            )
            .await
    }

    async fn callbacks_for_representative(
        &self,
        representative_id: Uuid,
        status: Option<CallbackStatus>,
    ) -> Result<Vec<CallbackRequest>, AppError> {
        self.guard
            .run(
                "list callbacks",
                sqlx::query_as::<_, CallbackRequest>(
                    r#"
                    SELECT * FROM callback_requests
                    WHERE representative_id = $1
                      AND ($2::callback_status IS NULL OR status = $2)
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(representative_id)
                .bind(status)
                .fetch_all(&self.pool),
            )
            .await
    }
}

/// Rating unit of work holding a row lock on the target representative.
pub struct PgRatingTx {
    tx: Transaction<'static, Postgres>,
    target: TargetKey,
    guard: StoreGuard,
}

#[async_trait]
impl RatingTx for PgRatingTx {
    async fn insert_rating(
        &mut self,
        rating: NewRating,
    ) -> Result<(Rating, Vec<QuestionRating>), AppError> {
        if rating.target != self.target {
            return Err(AppError::InternalError(format!(
                "rating for {} inserted under lock for {}",
                rating.target, self.target
            )));
        }

        let stored = self
            .guard
            .run(
                "insert rating",
                sqlx::query_as::<_, Rating>(
                    r#"
                    INSERT INTO ratings (
                        id, target_id, target_role, rater_id, rater_name, rater_email,
                        score, comment
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(rating.target.target_id)
                .bind(rating.target.target_role)
                .bind(rating.rater_id)
                .bind(&rating.rater_name)
                .bind(&rating.rater_email)
                .bind(rating.score)
                .bind(&rating.comment)
                .fetch_one(&mut *self.tx),
            )
            .await?;

        let mut question_rows = Vec::with_capacity(rating.question_scores.len());
        for q in &rating.question_scores {
            let row = self
                .guard
                .run(
                    "insert question rating",
                    sqlx::query_as::<_, QuestionRating>(
                        r#"
                        INSERT INTO question_ratings (id, rating_id, question_id, score)
                        VALUES ($1, $2, $3, $4)
                        RETURNING *
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(stored.id)
                    .bind(q.question_id)
                    .bind(q.score)
                    .fetch_one(&mut *self.tx),
                )
                .await?;
            question_rows.push(row);
        }

        Ok((stored, question_rows))
    }

    async fn find_rating(&mut self, id: Uuid) -> Result<Option<Rating>, AppError> {
        self.guard
            .run(
                "find rating",
                sqlx::query_as::<_, Rating>(
                    "SELECT * FROM ratings WHERE id = $1 AND target_id = $2 AND target_role = $3",
                )
                .bind(id)
                .bind(self.target.target_id)
                .bind(self.target.target_role)
                .fetch_optional(&mut *self.tx),
            )
            .await
    }

    async fn update_rating(
        &mut self,
        id: Uuid,
        score: i16,
        comment: Option<String>,
    ) -> Result<Option<Rating>, AppError> {
        self.guard
            .run(
                "update rating",
                sqlx::query_as::<_, Rating>(
                    r#"
                    UPDATE ratings SET score = $4, comment = $5
                    WHERE id = $1 AND target_id = $2 AND target_role = $3
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(self.target.target_id)
                .bind(self.target.target_role)
                .bind(score)
                .bind(comment)
                .fetch_optional(&mut *self.tx),
            )
            .await
    }

    async fn delete_rating(&mut self, id: Uuid) -> Result<Option<Rating>, AppError> {
        self.guard
            .run(
                "delete rating",
                sqlx::query_as::<_, Rating>(
                    r#"
                    DELETE FROM ratings
                    WHERE id = $1 AND target_id = $2 AND target_role = $3
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(self.target.target_id)
                .bind(self.target.target_role)
                .fetch_optional(&mut *self.tx),
            )
            .await
    }

    async fn target_scores(&mut self) -> Result<Vec<i16>, AppError> {
        self.guard
            .run(
                "read target scores",
                sqlx::query_scalar::<_, i16>(
                    "SELECT score FROM ratings WHERE target_id = $1 AND target_role = $2",
                )
                .bind(self.target.target_id)
                .bind(self.target.target_role)
                .fetch_all(&mut *self.tx),
            )
            .await
    }

    async fn write_average(&mut self, average: Option<f64>) -> Result<(), AppError> {
        self.guard
            .run(
                "write average",
                sqlx::query("UPDATE representatives SET average_score = $2 WHERE id = $1")
                    .bind(self.target.target_id)
                    .bind(average)
                    .execute(&mut *self.tx),
            )
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let PgRatingTx { tx, guard, target } = *self;
        guard.run("commit rating change", tx.commit()).await?;
        tracing::debug!("Committed rating change for {}", target);
        Ok(())
    }
}

#[async_trait]
impl RatingStore for PgStore {
    async fn begin(&self, target: TargetKey) -> Result<Box<dyn RatingTx>, AppError> {
        let mut tx = self.guard.run("begin rating change", self.pool.begin()).await?;

        // Row lock on the target serializes every aggregation for it.
        let locked = self
            .guard
            .run(
                "lock rating target",
                sqlx::query_scalar::<_, Uuid>(
                    "SELECT id FROM representatives WHERE id = $1 AND role = $2 FOR UPDATE",
                )
                .bind(target.target_id)
                .bind(target.target_role)
                .fetch_optional(&mut *tx),
            )
            .await?;

        if locked.is_none() {
            return Err(AppError::NotFound(format!(
                "No {} with id {}",
                target.target_role, target.target_id
            )));
        }

        Ok(Box::new(PgRatingTx {
            tx,
            target,
            guard: self.guard.clone(),
        }))
    }

    async fn get_rating(&self, id: Uuid) -> Result<Option<Rating>, AppError> {
        self.guard
            .run(
                "get rating",
                sqlx::query_as::<_, Rating>("SELECT * FROM ratings WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await
    }

    async fn ratings_for_target(&self, target: TargetKey) -> Result<Vec<Rating>, AppError> {
        self.guard
            .run(
                "list ratings",
                sqlx::query_as::<_, Rating>(
                    r#"
                    SELECT * FROM ratings
                    WHERE target_id = $1 AND target_role = $2
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(target.target_id)
                .bind(target.target_role)
                .fetch_all(&self.pool),
            )
            .await
    }

    async fn question_ratings(&self, rating_id: Uuid) -> Result<Vec<QuestionRating>, AppError> {
        self.guard
            .run(
                "list question ratings",
                sqlx::query_as::<_, QuestionRating>(
                    "SELECT * FROM question_ratings WHERE rating_id = $1 ORDER BY question_id",
                )
                .bind(rating_id)
                .fetch_all(&self.pool),
            )
            .await
    }

    async fn question_history(
        &self,
        question_id: Uuid,
        target: Option<TargetKey>,
    ) -> Result<Vec<QuestionHistoryEntry>, AppError> {
        self.guard
            .run(
                "question history",
                sqlx::query_as::<_, QuestionHistoryEntry>(
                    r#"
                    SELECT qr.rating_id, r.target_id, r.target_role, qr.score, r.created_at
                    FROM question_ratings qr
                    JOIN ratings r ON r.id = qr.rating_id
                    WHERE qr.question_id = $1
                      AND ($2::uuid IS NULL OR (r.target_id = $2 AND r.target_role = $3))
                    ORDER BY r.created_at DESC
                    "#,
                )
                .bind(question_id)
                .bind(target.map(|t| t.target_id))
                .bind(target.map(|t| t.target_role))
                .fetch_all(&self.pool),
            )
            .await
    }

    async fn active_questions(&self, role: TargetRole) -> Result<Vec<RatingQuestion>, AppError> {
        self.guard
            .run(
                "active questions",
                sqlx::query_as::<_, RatingQuestion>(
                    r#"
                    SELECT * FROM rating_questions
                    WHERE target_role = $1 AND is_active
                    ORDER BY display_order, id
                    "#,
                )
                .bind(role)
                .fetch_all(&self.pool),
            )
            .await
    }

    async fn get_question(&self, id: Uuid) -> Result<Option<RatingQuestion>, AppError> {
        self.guard
            .run(
                "get question",
                sqlx::query_as::<_, RatingQuestion>("SELECT * FROM rating_questions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await
    }

    async fn all_targets(&self) -> Result<Vec<TargetKey>, AppError> {
        let rows = self
            .guard
            .run(
                "list targets",
                sqlx::query_as::<_, (Uuid, TargetRole)>(
                    "SELECT id, role FROM representatives ORDER BY id",
                )
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, role)| TargetKey::new(id, role))
            .collect())
    }
}
