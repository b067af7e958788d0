//! Callback request lifecycle.
//!
//! ```text
//! Pending ──schedule──▶ Scheduled ──complete──▶ Completed
//!    │                      │
//!    └───────cancel─────────┴──────cancel─────▶ Cancelled
//! ```
//!
//! [`transition`] is a pure function from the current request and a requested
//! action to the full set of field writes. [`CallbackWorkflow`] wraps it with
//! ownership checks and a compare-and-set write against the store.

use chrono::{DateTime, Utc};
use phonenumber::country::Id as CountryId;
use std::sync::Arc;
use uuid::Uuid;

use crate::caller::Caller;
use crate::errors::AppError;
use crate::models::{CallbackRequest, CallbackStatus, CreateCallbackPayload, NewCallbackRequest};
use crate::store::{AgentDirectory, CallbackStore};
use crate::validation;

/// Whether a pending request may be completed without being scheduled first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionPolicy {
    pub allow_complete_from_pending: bool,
}

/// A requested lifecycle change.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAction {
    Schedule {
        at: Option<DateTime<Utc>>,
        notes: Option<String>,
    },
    Complete {
        notes: Option<String>,
    },
    Cancel {
        notes: Option<String>,
    },
}

impl CallbackAction {
    pub fn name(&self) -> &'static str {
        match self {
            CallbackAction::Schedule { .. } => "schedule",
            CallbackAction::Complete { .. } => "complete",
            CallbackAction::Cancel { .. } => "cancel",
        }
    }

    fn notes(&self) -> Option<&str> {
        match self {
            CallbackAction::Schedule { notes, .. }
            | CallbackAction::Complete { notes }
            | CallbackAction::Cancel { notes } => notes.as_deref(),
        }
    }

    /// Maps a requested target status onto an action. `Pending` has no
    /// incoming transition and yields `None`.
    pub fn for_status(
        status: CallbackStatus,
        scheduled_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Option<Self> {
        match status {
            CallbackStatus::Pending => None,
            CallbackStatus::Scheduled => Some(CallbackAction::Schedule {
                at: scheduled_at,
                notes,
            }),
            CallbackStatus::Completed => Some(CallbackAction::Complete { notes }),
            CallbackStatus::Cancelled => Some(CallbackAction::Cancel { notes }),
        }
    }
}

/// Complete set of field values to write for one transition.
///
/// `from` is the status the transition was validated against; stores only
/// apply it if the row still has that status.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackTransition {
    pub from: CallbackStatus,
    pub to: CallbackStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl CallbackTransition {
    /// The request as it looks once this transition is applied.
    pub fn apply_to(&self, request: &CallbackRequest, now: DateTime<Utc>) -> CallbackRequest {
        CallbackRequest {
            status: self.to,
            scheduled_at: self.scheduled_at,
            completed_at: self.completed_at,
            notes: self.notes.clone(),
            updated_at: now,
            ..request.clone()
        }
    }
}

fn invalid(from: CallbackStatus, action: &CallbackAction) -> AppError {
    AppError::InvalidTransition {
        from,
        action: action.name().to_string(),
    }
}

/// Appends `new` to `existing` on a new line; blank notes are ignored.
pub fn merge_notes(existing: Option<&str>, new: Option<&str>) -> Option<String> {
    let new = new.map(str::trim).filter(|n| !n.is_empty());
    match (existing, new) {
        (Some(old), Some(new)) if !old.is_empty() => Some(format!("{}\n{}", old, new)),
        (_, Some(new)) => Some(new.to_string()),
        (old, None) => old.map(str::to_string),
    }
}

/// Validates `action` against the request's current status and returns the
/// resulting field writes.
pub fn transition(
    current: &CallbackRequest,
    action: &CallbackAction,
    now: DateTime<Utc>,
    policy: CompletionPolicy,
) -> Result<CallbackTransition, AppError> {
    let from = current.status;
    let notes = merge_notes(current.notes.as_deref(), action.notes());

    match action {
        CallbackAction::Schedule { at, .. } => {
            if from != CallbackStatus::Pending {
                return Err(invalid(from, action));
            }
            let at = at.ok_or(AppError::MissingField("scheduledAt"))?;
            Ok(CallbackTransition {
                from,
                to: CallbackStatus::Scheduled,
                scheduled_at: Some(at),
                completed_at: None,
                notes,
            })
        }
        CallbackAction::Complete { .. } => {
            let allowed = match from {
                CallbackStatus::Scheduled => true,
                CallbackStatus::Pending => policy.allow_complete_from_pending,
                CallbackStatus::Completed | CallbackStatus::Cancelled => false,
            };
            if !allowed {
                return Err(invalid(from, action));
            }
            Ok(CallbackTransition {
                from,
                to: CallbackStatus::Completed,
                scheduled_at: current.scheduled_at,
                completed_at: Some(now),
                notes,
            })
        }
        CallbackAction::Cancel { .. } => {
            if from.is_terminal() {
                return Err(invalid(from, action));
            }
            Ok(CallbackTransition {
                from,
                to: CallbackStatus::Cancelled,
                scheduled_at: current.scheduled_at,
                completed_at: None,
                notes,
            })
        }
    }
}

/// Validates a creation payload into a storable request.
pub fn validate_new_callback(
    payload: &CreateCallbackPayload,
    caller: &Caller,
    phone_region: CountryId,
) -> Result<NewCallbackRequest, AppError> {
    let representative_id = payload
        .representative_id
        .ok_or(AppError::MissingField("representativeId"))?;
    let requester_name = validation::required_text(payload.requester_name.as_deref(), "requesterName")?;
    let purpose = validation::required_text(payload.purpose.as_deref(), "purpose")?;
    if purpose.chars().count() > validation::MAX_PURPOSE_LEN {
        return Err(AppError::Validation(format!(
            "purpose must be at most {} characters",
            validation::MAX_PURPOSE_LEN
        )));
    }

    let requester_phone = validation::optional_text(payload.requester_phone.as_deref())
        .map(|raw| validation::normalize_phone(&raw, phone_region))
        .transpose()?;
    let requester_email = validation::optional_text(payload.requester_email.as_deref());
    if let Some(ref email) = requester_email {
        if !validation::is_valid_email(email) {
            return Err(AppError::Validation(format!(
                "requesterEmail '{}' is not a valid email address",
                email
            )));
        }
    }
    if requester_phone.is_none() && requester_email.is_none() {
        return Err(AppError::MissingField("requesterPhone or requesterEmail"));
    }

    Ok(NewCallbackRequest {
        representative_id,
        requester_id: caller.id.filter(|_| caller.is_authenticated()),
        requester_name,
        requester_phone,
        requester_email,
        purpose,
    })
}

/// Drives callback requests through their lifecycle against the stores.
#[derive(Clone)]
pub struct CallbackWorkflow {
    directory: Arc<dyn AgentDirectory>,
    store: Arc<dyn CallbackStore>,
    policy: CompletionPolicy,
}

impl CallbackWorkflow {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        store: Arc<dyn CallbackStore>,
        policy: CompletionPolicy,
    ) -> Self {
        Self {
            directory,
            store,
            policy,
        }
    }

    /// Creates a `Pending` request for an enabled, currently available representative.
    pub async fn create(
        &self,
        caller: &Caller,
        payload: &CreateCallbackPayload,
        phone_region: CountryId,
    ) -> Result<CallbackRequest, AppError> {
        let new = validate_new_callback(payload, caller, phone_region)?;

        let representative = self
            .directory
            .get_representative(new.representative_id)
            .await?
            .filter(|r| r.is_enabled())
            .ok_or_else(|| {
                AppError::NotFound(format!("Representative {} not found", new.representative_id))
            })?;

        if !representative.is_available {
            return Err(AppError::Conflict(format!(
                "Representative {} is not currently available",
                representative.id
            )));
        }

        let created = self.store.insert_callback(new).await?;
        tracing::info!(
            "Callback {} created for representative {}",
            created.id,
            created.representative_id
        );
        Ok(created)
    }

    /// Reads a request; only its owner or an administrator may see it.
    pub async fn get(&self, caller: &Caller, id: Uuid) -> Result<CallbackRequest, AppError> {
        let request = self.load(id).await?;
        caller.ensure_may_act_for(request.representative_id, "callback request")?;
        Ok(request)
    }

    pub async fn list_for_representative(
        &self,
        caller: &Caller,
        representative_id: Uuid,
        status: Option<CallbackStatus>,
    ) -> Result<Vec<CallbackRequest>, AppError> {
        caller.ensure_may_act_for(representative_id, "callback requests")?;
        self.store
            .callbacks_for_representative(representative_id, status)
            .await
    }

    pub async fn schedule(
        &self,
        caller: &Caller,
        id: Uuid,
        at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<CallbackRequest, AppError> {
        self.apply(caller, id, CallbackAction::Schedule { at, notes })
            .await
    }

    pub async fn complete(
        &self,
        caller: &Caller,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<CallbackRequest, AppError> {
        self.apply(caller, id, CallbackAction::Complete { notes }).await
    }

    pub async fn cancel(
        &self,
        caller: &Caller,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<CallbackRequest, AppError> {
        self.apply(caller, id, CallbackAction::Cancel { notes }).await
    }

    /// Moves a request to `status`, dispatching to the matching transition.
    pub async fn update_status(
        &self,
        caller: &Caller,
        id: Uuid,
        status: CallbackStatus,
        scheduled_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<CallbackRequest, AppError> {
        match CallbackAction::for_status(status, scheduled_at, notes) {
            Some(action) => self.apply(caller, id, action).await,
            None => {
                let current = self.get(caller, id).await?;
                Err(AppError::InvalidTransition {
                    from: current.status,
                    action: "reopen".to_string(),
                })
            }
        }
    }

    /// Reads, authorizes, validates and conditionally writes one transition.
    ///
    /// If the status moved between read and write, the action is re-validated
    /// against a fresh read once; a second lost race surfaces as `Conflict`.
    pub async fn apply(
        &self,
        caller: &Caller,
        id: Uuid,
        action: CallbackAction,
    ) -> Result<CallbackRequest, AppError> {
        for attempt in 0..2 {
            let current = self.load(id).await?;
            caller.ensure_may_act_for(current.representative_id, "callback request")?;

            let change = transition(&current, &action, Utc::now(), self.policy)?;
            match self.store.apply_transition(id, &change).await? {
                Some(updated) => {
                    tracing::info!(
                        "Callback {} moved {} -> {} by {:?}",
                        id,
                        change.from,
                        change.to,
                        caller.id
                    );
                    return Ok(updated);
                }
                None => {
                    tracing::warn!(
                        "Callback {} changed while applying {} (attempt {}), re-reading",
                        id,
                        action.name(),
                        attempt + 1
                    );
                }
            }
        }

        Err(AppError::Conflict(format!(
            "Callback {} kept changing while applying {}",
            id,
            action.name()
        )))
    }

    async fn load(&self, id: Uuid) -> Result<CallbackRequest, AppError> {
        self.store
            .get_callback(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Callback request {} not found", id)))
    }
}
