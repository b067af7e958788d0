//! In-process implementations of the store contracts.
//!
//! Rating units of work take a per-target async lock and stage their changes
//! locally; nothing becomes visible until `commit`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::callback_workflow::CallbackTransition;
use crate::errors::AppError;
use crate::geo::{BoundingBox, Coordinate};
use crate::models::{
    CallbackRequest, CallbackStatus, NewCallbackRequest, NewRating, QuestionHistoryEntry,
    QuestionRating, Rating, RatingQuestion, Representative, TargetKey, TargetRole,
};
use crate::store::{AgentDirectory, CallbackStore, RatingStore, RatingTx};

#[derive(Default)]
struct MemoryState {
    representatives: HashMap<Uuid, Representative>,
    callbacks: HashMap<Uuid, CallbackRequest>,
    ratings: HashMap<Uuid, Rating>,
    question_ratings: HashMap<Uuid, Vec<QuestionRating>>,
    questions: HashMap<Uuid, RatingQuestion>,
}

type TargetLocks = Arc<Mutex<HashMap<TargetKey, Arc<AsyncMutex<()>>>>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    target_locks: TargetLocks,
}

/// Exclusive hold on one target. The map entry is dropped once nobody holds
/// or waits for it.
struct TargetLease {
    locks: TargetLocks,
    target: TargetKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.target)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.target);
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lease(&self, target: TargetKey) -> TargetLease {
        let lock = self
            .target_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(target)
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        TargetLease {
            locks: self.target_locks.clone(),
            target,
            guard: Some(guard),
        }
    }

    pub fn insert_representative(&self, representative: Representative) {
        self.state()
            .representatives
            .insert(representative.id, representative);
    }

    pub fn insert_question(&self, question: RatingQuestion) {
        self.state().questions.insert(question.id, question);
    }

    /// Current snapshot of a representative.
    pub fn representative(&self, id: Uuid) -> Option<Representative> {
        self.state().representatives.get(&id).cloned()
    }

    /// Current snapshot of a callback request.
    pub fn callback(&self, id: Uuid) -> Option<CallbackRequest> {
        self.state().callbacks.get(&id).cloned()
    }
}

#[async_trait]
impl AgentDirectory for MemoryStore {
    async fn get_representative(&self, id: Uuid) -> Result<Option<Representative>, AppError> {
        Ok(self.representative(id))
    }

    async fn search_candidates(&self, area: &BoundingBox) -> Result<Vec<Representative>, AppError> {
        Ok(self
            .state()
            .representatives
            .values()
            .filter(|r| r.is_discoverable())
            .filter(|r| r.location().is_some_and(|p| area.contains(p)))
            .cloned()
            .collect())
    }

    async fn update_location(
        &self,
        id: Uuid,
        location: Coordinate,
        at: DateTime<Utc>,
    ) -> Result<Option<Representative>, AppError> {
        let mut state = self.state();
        Ok(state.representatives.get_mut(&id).map(|r| {
            r.latitude = Some(location.latitude());
            r.longitude = Some(location.longitude());
            r.location_updated_at = Some(at);
            r.clone()
        }))
    }

    async fn set_availability(
        &self,
        id: Uuid,
        available: bool,
    ) -> Result<Option<Representative>, AppError> {
        let mut state = self.state();
        Ok(state.representatives.get_mut(&id).map(|r| {
            r.is_available = available;
            r.clone()
        }))
    }
}

#[async_trait]
impl CallbackStore for MemoryStore {
    async fn insert_callback(&self, new: NewCallbackRequest) -> Result<CallbackRequest, AppError> {
        let now = Utc::now();
        let request = CallbackRequest {
            id: Uuid::new_v4(),
            representative_id: new.representative_id,
            requester_id: new.requester_id,
            requester_name: new.requester_name,
            requester_phone: new.requester_phone,
            requester_email: new.requester_email,
            purpose: new.purpose,
            status: CallbackStatus::Pending,
            scheduled_at: None,
            completed_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        self.state().callbacks.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_callback(&self, id: Uuid) -> Result<Option<CallbackRequest>, AppError> {
        Ok(self.callback(id))
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        transition: &CallbackTransition,
    ) -> Result<Option<CallbackRequest>, AppError> {
        let mut state = self.state();
        match state.callbacks.get_mut(&id) {
            Some(request) if request.status == transition.from => {
                *request = transition.apply_to(request, Utc::now());
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn callbacks_for_representative(
        &self,
        representative_id: Uuid,
        status: Option<CallbackStatus>,
    ) -> Result<Vec<CallbackRequest>, AppError> {
        let mut found: Vec<CallbackRequest> = self
            .state()
            .callbacks
            .values()
            .filter(|c| c.representative_id == representative_id)
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}

/// Staged changes to one target's ratings.
pub struct MemoryRatingTx {
    store: MemoryStore,
    target: TargetKey,
    _lease: TargetLease,
    working: HashMap<Uuid, Rating>,
    new_questions: HashMap<Uuid, Vec<QuestionRating>>,
    removed: HashSet<Uuid>,
    average: Option<Option<f64>>,
}

#[async_trait]
impl RatingTx for MemoryRatingTx {
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

        let stored = Rating {
            id: Uuid::new_v4(),
            target_id: rating.target.target_id,
            target_role: rating.target.target_role,
            rater_id: rating.rater_id,
            rater_name: rating.rater_name,
            rater_email: rating.rater_email,
            score: rating.score,
            comment: rating.comment,
            created_at: Utc::now(),
        };
        let questions: Vec<QuestionRating> = rating
            .question_scores
            .iter()
            .map(|q| QuestionRating {
                id: Uuid::new_v4(),
                rating_id: stored.id,
                question_id: q.question_id,
                score: q.score,
            })
            .collect();

        self.working.insert(stored.id, stored.clone());
        self.new_questions.insert(stored.id, questions.clone());
        Ok((stored, questions))
    }

    async fn find_rating(&mut self, id: Uuid) -> Result<Option<Rating>, AppError> {
        Ok(self.working.get(&id).cloned())
    }

    async fn update_rating(
        &mut self,
        id: Uuid,
        score: i16,
        comment: Option<String>,
    ) -> Result<Option<Rating>, AppError> {
        Ok(self.working.get_mut(&id).map(|r| {
            r.score = score;
            r.comment = comment;
            r.clone()
        }))
    }

    async fn delete_rating(&mut self, id: Uuid) -> Result<Option<Rating>, AppError> {
        let removed = self.working.remove(&id);
        if removed.is_some() {
            self.new_questions.remove(&id);
            self.removed.insert(id);
        }
        Ok(removed)
    }

    async fn target_scores(&mut self) -> Result<Vec<i16>, AppError> {
        Ok(self.working.values().map(|r| r.score).collect())
    }

    async fn write_average(&mut self, average: Option<f64>) -> Result<(), AppError> {
        self.average = Some(average);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryRatingTx {
            store,
            target,
            _lease,
            working,
            new_questions,
            removed,
            average,
        } = *self;

        let mut state = store.state();
        for id in &removed {
            state.ratings.remove(id);
            state.question_ratings.remove(id);
        }
        for (id, rating) in working {
            state.ratings.insert(id, rating);
        }
        for (rating_id, rows) in new_questions {
            state.question_ratings.insert(rating_id, rows);
        }
        if let Some(average) = average {
            if let Some(rep) = state.representatives.get_mut(&target.target_id) {
                rep.average_score = average;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn begin(&self, target: TargetKey) -> Result<Box<dyn RatingTx>, AppError> {
        let lease = self.lease(target).await;

        let working: HashMap<Uuid, Rating> = {
            let state = self.state();
            match state.representatives.get(&target.target_id) {
                Some(rep) if rep.role == target.target_role => {}
                _ => {
                    return Err(AppError::NotFound(format!(
                        "No {} with id {}",
                        target.target_role, target.target_id
                    )))
                }
            }
            state
                .ratings
                .values()
                .filter(|r| r.target() == target)
                .map(|r| (r.id, r.clone()))
                .collect()
        };

        Ok(Box::new(MemoryRatingTx {
            store: self.clone(),
            target,
            _lease: lease,
            working,
            new_questions: HashMap::new(),
            removed: HashSet::new(),
            average: None,
        }))
    }

    async fn get_rating(&self, id: Uuid) -> Result<Option<Rating>, AppError> {
        Ok(self.state().ratings.get(&id).cloned())
    }

    async fn ratings_for_target(&self, target: TargetKey) -> Result<Vec<Rating>, AppError> {
        let mut found: Vec<Rating> = self
            .state()
            .ratings
            .values()
            .filter(|r| r.target() == target)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn question_ratings(&self, rating_id: Uuid) -> Result<Vec<QuestionRating>, AppError> {
        let mut rows = self
            .state()
            .question_ratings
            .get(&rating_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|q| q.question_id);
        Ok(rows)
    }

    async fn question_history(
        &self,
        question_id: Uuid,
        target: Option<TargetKey>,
    ) -> Result<Vec<QuestionHistoryEntry>, AppError> {
        let state = self.state();
        let mut entries: Vec<QuestionHistoryEntry> = state
            .question_ratings
            .values()
            .flatten()
            .filter(|q| q.question_id == question_id)
            .filter_map(|q| {
                let rating = state.ratings.get(&q.rating_id)?;
                if target.is_some_and(|t| rating.target() != t) {
                    return None;
                }
                Some(QuestionHistoryEntry {
                    rating_id: rating.id,
                    target_id: rating.target_id,
                    target_role: rating.target_role,
                    score: q.score,
                    created_at: rating.created_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn active_questions(&self, role: TargetRole) -> Result<Vec<RatingQuestion>, AppError> {
        let mut found: Vec<RatingQuestion> = self
            .state()
            .questions
            .values()
            .filter(|q| q.target_role == role && q.is_active)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.display_order.cmp(&b.display_order).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn get_question(&self, id: Uuid) -> Result<Option<RatingQuestion>, AppError> {
        Ok(self.state().questions.get(&id).cloned())
    }

    async fn all_targets(&self) -> Result<Vec<TargetKey>, AppError> {
        let mut targets: Vec<TargetKey> = self
            .state()
            .representatives
            .values()
            .map(|r| TargetKey::new(r.id, r.role))
            .collect();
        targets.sort_by_key(|t| t.target_id);
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn seeded() -> (MemoryStore, TargetKey, TargetKey) {
        let store = MemoryStore::new();
        let mut keys = Vec::new();
        for _ in 0..2 {
            let rep = Representative {
                id: Uuid::new_v4(),
                display_name: "rep".into(),
                role: TargetRole::Agent,
                headline: None,
                latitude: None,
                longitude: None,
                location_updated_at: None,
                is_available: true,
                is_approved: true,
                is_active: true,
                average_score: None,
                created_at: Utc::now(),
            };
            keys.push(TargetKey::new(rep.id, rep.role));
            store.insert_representative(rep);
        }
        (store, keys[0], keys[1])
    }

    fn rating(target: TargetKey, score: i16) -> NewRating {
        NewRating {
            target,
            rater_id: Some(Uuid::new_v4()),
            rater_name: None,
            rater_email: None,
            score,
            comment: None,
            question_scores: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_begin_serializes_same_target_only() {
        let (store, a, b) = seeded();
        let held = store.begin(a).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), store.begin(a)).await;
        assert!(blocked.is_err(), "second unit of work on the same target must wait");

        let other = tokio::time::timeout(Duration::from_millis(50), store.begin(b)).await;
        assert!(other.is_ok(), "other targets must not be blocked");

        drop(held);
        let reopened = tokio::time::timeout(Duration::from_millis(50), store.begin(a)).await;
        assert!(reopened.is_ok());
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded() {
        let (store, a, _) = seeded();
        let mut tx = store.begin(a).await.unwrap();
        tx.insert_rating(rating(a, 5)).await.unwrap();
        tx.write_average(Some(5.0)).await.unwrap();
        drop(tx);

        assert!(store.ratings_for_target(a).await.unwrap().is_empty());
        assert_eq!(store.representative(a.target_id).unwrap().average_score, None);
    }

    #[tokio::test]
    async fn test_target_locks_are_released() {
        let (store, a, b) = seeded();

        let mut tx = store.begin(a).await.unwrap();
        tx.insert_rating(rating(a, 4)).await.unwrap();
        tx.commit().await.unwrap();
        drop(store.begin(b).await.unwrap());
        let wrong = TargetKey::new(a.target_id, TargetRole::Employee);
        assert!(store.begin(wrong).await.is_err());

        assert!(store.target_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_waiting_unit_of_work_keeps_lock_entry() {
        let (store, a, _) = seeded();
        let held = store.begin(a).await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.begin(a).await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        assert!(store.target_locks.lock().unwrap().contains_key(&a));

        waiter.await.unwrap().unwrap();
        assert!(store.target_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_begin_checks_role() {
        let (store, a, _) = seeded();
        let wrong = TargetKey::new(a.target_id, TargetRole::Employee);
        assert!(matches!(store.begin(wrong).await, Err(AppError::NotFound(_))));
    }
}
