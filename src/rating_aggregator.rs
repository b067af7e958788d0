//! Rating submission and average maintenance.
//!
//! Every create, update or delete of a rating runs inside one
//! [`RatingTx`](crate::store::RatingTx) on the rated target: the mutation, the
//! recompute over all of the target's ratings, and the write of the new
//! average commit together or not at all. The store serializes units of work
//! per target, so concurrent submissions cannot lose each other's scores.

use moka::future::Cache;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::caller::Caller;
use crate::errors::AppError;
use crate::models::{
    CreateRatingPayload, NewRating, QuestionHistory, QuestionRating, QuestionScore, Rating,
    RatingQuestion, RatingResponse, RatingSummary, TargetKey, TargetRole, UpdateRatingPayload,
};
use crate::store::{AgentDirectory, RatingStore, RatingTx};
use crate::validation;

/// Rounds to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Mean of `scores` rounded to one decimal; `None` when there are no scores.
pub fn average(scores: &[i16]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let sum: i64 = scores.iter().map(|&s| i64::from(s)).sum();
    Some(round1(sum as f64 / scores.len() as f64))
}

/// Overall score implied by a question breakdown: the mean rounded half up.
pub fn derive_overall(question_scores: &[QuestionScore]) -> Option<i16> {
    if question_scores.is_empty() {
        return None;
    }
    let sum: i64 = question_scores.iter().map(|q| i64::from(q.score)).sum();
    let mean = sum as f64 / question_scores.len() as f64;
    Some(mean.round() as i16)
}

async fn recompute_in(tx: &mut dyn RatingTx) -> Result<Option<f64>, AppError> {
    let scores = tx.target_scores().await?;
    let avg = average(&scores);
    tx.write_average(avg).await?;
    Ok(avg)
}

/// Runs `op`, retrying exactly once if it lost a race with `Conflict`.
async fn retry_once<T, F, Fut>(what: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    match op().await {
        Err(e) if matches!(e.root(), AppError::Conflict(_)) => {
            tracing::warn!("{} lost a concurrent race, retrying once: {}", what, e);
            op().await
        }
        other => other,
    }
}

pub struct RatingAggregator {
    ratings: Arc<dyn RatingStore>,
    directory: Arc<dyn AgentDirectory>,
    questions: Cache<TargetRole, Arc<Vec<RatingQuestion>>>,
}

impl RatingAggregator {
    pub fn new(
        ratings: Arc<dyn RatingStore>,
        directory: Arc<dyn AgentDirectory>,
        question_ttl: Duration,
    ) -> Self {
        let questions = Cache::builder()
            .time_to_live(question_ttl)
            .max_capacity(16)
            .build();
        Self {
            ratings,
            directory,
            questions,
        }
    }

    /// Active questions for `role`, served from a short-lived cache.
    pub async fn active_questions(
        &self,
        role: TargetRole,
    ) -> Result<Arc<Vec<RatingQuestion>>, AppError> {
        let store = self.ratings.clone();
        self.questions
            .try_get_with(role, async move { store.active_questions(role).await.map(Arc::new) })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Validates a submission into a storable rating.
    async fn validate(
        &self,
        caller: &Caller,
        payload: &CreateRatingPayload,
    ) -> Result<NewRating, AppError> {
        let target_id = payload.target_id.ok_or(AppError::MissingField("targetId"))?;
        let target_role = payload
            .target_role
            .ok_or(AppError::MissingField("targetRole"))?;

        let mut question_scores = Vec::with_capacity(payload.question_scores.len());
        let mut seen = HashSet::new();
        for q in &payload.question_scores {
            if !seen.insert(q.question_id) {
                return Err(AppError::Validation(format!(
                    "question {} was scored more than once",
                    q.question_id
                )));
            }
            question_scores.push(QuestionScore {
                question_id: q.question_id,
                score: validation::score(q.score, "questionScores[].score")?,
            });
        }

        let score = match payload.score {
            Some(raw) => validation::score(raw, "score")?,
            None => derive_overall(&question_scores).ok_or(AppError::MissingField("score"))?,
        };

        let rater_name = validation::optional_text(payload.rater_name.as_deref());
        let rater_email = validation::optional_text(payload.rater_email.as_deref());
        if !caller.is_authenticated() {
            if rater_name.is_none() {
                return Err(AppError::Validation(
                    "raterName is required for anonymous ratings".to_string(),
                ));
            }
            match rater_email.as_deref() {
                Some(email) if validation::is_valid_email(email) => {}
                _ => {
                    return Err(AppError::Validation(
                        "a valid raterEmail is required for anonymous ratings".to_string(),
                    ))
                }
            }
        }

        let comment = validation::optional_text(payload.comment.as_deref());
        if comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > validation::MAX_COMMENT_LEN)
        {
            return Err(AppError::Validation(format!(
                "comment must be at most {} characters",
                validation::MAX_COMMENT_LEN
            )));
        }

        let target = TargetKey::new(target_id, target_role);
        self.ensure_target(target).await?;

        if !question_scores.is_empty() {
            let active = self.active_questions(target_role).await?;
            let known: HashSet<Uuid> = active.iter().map(|q| q.id).collect();
            if let Some(unknown) = question_scores.iter().find(|q| !known.contains(&q.question_id)) {
                return Err(AppError::Validation(format!(
                    "question {} is not an active {} question",
                    unknown.question_id, target_role
                )));
            }
        }

        Ok(NewRating {
            target,
            rater_id: caller.id.filter(|_| caller.is_authenticated()),
            rater_name,
            rater_email,
            score,
            comment,
            question_scores,
        })
    }

    async fn ensure_target(&self, target: TargetKey) -> Result<(), AppError> {
        match self.directory.get_representative(target.target_id).await? {
            Some(rep) if rep.role == target.target_role => Ok(()),
            _ => Err(AppError::NotFound(format!("No {} with id {}", target.target_role, target.target_id))),
        }
    }

    /// Validates and stores a rating, then recomputes the target's average.
    pub async fn submit(
        &self,
        caller: &Caller,
        payload: &CreateRatingPayload,
    ) -> Result<RatingResponse, AppError> {
        let new = self.validate(caller, payload).await?;
        let target = new.target;

        let (rating, question_scores, target_average) =
            retry_once("rating submission", || self.submit_once(&new)).await?;

        tracing::info!(
            "Rating {} ({}) stored for {}, average now {:?}",
            rating.id,
            rating.score,
            target,
            target_average
        );

        Ok(RatingResponse {
            rating,
            question_scores,
            target_average,
        })
    }

    async fn submit_once(
        &self,
        new: &NewRating,
    ) -> Result<(Rating, Vec<QuestionRating>, Option<f64>), AppError> {
        let mut tx = self.ratings.begin(new.target).await?;
        let (rating, question_scores) = tx.insert_rating(new.clone()).await?;
        let average = recompute_in(tx.as_mut()).await?;
        tx.commit().await?;
        Ok((rating, question_scores, average))
    }

    /// Administrative edit of a rating's score and/or comment.
    pub async fn update(
        &self,
        caller: &Caller,
        id: Uuid,
        payload: &UpdateRatingPayload,
    ) -> Result<RatingResponse, AppError> {
        caller.ensure_admin("editing a rating")?;

        let score = payload
            .score
            .map(|raw| validation::score(raw, "score"))
            .transpose()?;
        let comment = validation::optional_text(payload.comment.as_deref());
        if score.is_none() && comment.is_none() {
            return Err(AppError::Validation(
                "nothing to update: supply score and/or comment".to_string(),
            ));
        }

        let existing = self.load(id).await?;
        let (rating, target_average) = retry_once("rating update", || {
            self.update_once(existing.target(), id, score, comment.clone())
        })
        .await?;
        let question_scores = self.ratings.question_ratings(id).await?;

        tracing::info!(
            "Rating {} edited by admin {:?}, average now {:?}",
            id,
            caller.id,
            target_average
        );

        Ok(RatingResponse {
            rating,
            question_scores,
            target_average,
        })
    }

    async fn update_once(
        &self,
        target: TargetKey,
        id: Uuid,
        score: Option<i16>,
        comment: Option<String>,
    ) -> Result<(Rating, Option<f64>), AppError> {
        let mut tx = self.ratings.begin(target).await?;
        let current = tx
            .find_rating(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Rating {} not found", id)))?;
        let rating = tx
            .update_rating(
                id,
                score.unwrap_or(current.score),
                comment.or(current.comment),
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Rating {} not found", id)))?;
        let average = recompute_in(tx.as_mut()).await?;
        tx.commit().await?;
        Ok((rating, average))
    }

    /// Administrative delete. Returns the target's new average.
    pub async fn delete(&self, caller: &Caller, id: Uuid) -> Result<Option<f64>, AppError> {
        caller.ensure_admin("deleting a rating")?;
        let existing = self.load(id).await?;
        let target = existing.target();

        let average = retry_once("rating delete", || self.delete_once(target, id)).await?;
        tracing::info!(
            "Rating {} deleted by admin {:?}, average for {} now {:?}",
            id,
            caller.id,
            target,
            average
        );
        Ok(average)
    }

    async fn delete_once(&self, target: TargetKey, id: Uuid) -> Result<Option<f64>, AppError> {
        let mut tx = self.ratings.begin(target).await?;
        tx.delete_rating(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Rating {} not found", id)))?;
        let average = recompute_in(tx.as_mut()).await?;
        tx.commit().await?;
        Ok(average)
    }

    /// Recomputes and stores `target`'s average from its current ratings.
    pub async fn recompute(&self, target: TargetKey) -> Result<Option<f64>, AppError> {
        retry_once("average recompute", move || async move {
            let mut tx = self.ratings.begin(target).await?;
            let average = recompute_in(tx.as_mut()).await?;
            tx.commit().await?;
            Ok(average)
        })
        .await
    }

    pub async fn summary(&self, representative_id: Uuid) -> Result<RatingSummary, AppError> {
        let rep = self
            .directory
            .get_representative(representative_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Representative {} not found", representative_id))
            })?;
        let ratings = self
            .ratings
            .ratings_for_target(TargetKey::new(rep.id, rep.role))
            .await?;

        let mut distribution = [0usize; 5];
        for r in &ratings {
            if let Some(slot) = usize::try_from(r.score - 1).ok().and_then(|i| distribution.get_mut(i)) {
                *slot += 1;
            }
        }

        Ok(RatingSummary {
            target_id: rep.id,
            target_role: rep.role,
            average_score: rep.average_score,
            count: ratings.len(),
            distribution,
            ratings,
        })
    }

    /// Score history for one question, optionally narrowed to one target.
    pub async fn question_history(
        &self,
        question_id: Uuid,
        target: Option<TargetKey>,
    ) -> Result<QuestionHistory, AppError> {
        self.ratings
            .get_question(question_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Question {} not found", question_id)))?;

        let entries = self.ratings.question_history(question_id, target).await?;
        let scores: Vec<i16> = entries.iter().map(|e| e.score).collect();

        Ok(QuestionHistory {
            question_id,
            count: entries.len(),
            mean: average(&scores),
            entries,
        })
    }

    async fn load(&self, id: Uuid) -> Result<Rating, AppError> {
        self.ratings
            .get_rating(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Rating {} not found", id)))
    }
}
