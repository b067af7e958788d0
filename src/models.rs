use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::geo::Coordinate;

// ============ Enumerations ============

/// Role of an entity that can be rated and contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "target_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    Agent,
    Employee,
}

impl fmt::Display for TargetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRole::Agent => f.write_str("agent"),
            TargetRole::Employee => f.write_str("employee"),
        }
    }
}

impl FromStr for TargetRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(TargetRole::Agent),
            "employee" => Ok(TargetRole::Employee),
            other => Err(format!("unknown target role '{}'", other)),
        }
    }
}

/// Lifecycle status of a callback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "callback_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Pending,
    Scheduled,
    Completed,
    Cancelled,
}

impl CallbackStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallbackStatus::Completed | CallbackStatus::Cancelled)
    }
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallbackStatus::Pending => "pending",
            CallbackStatus::Scheduled => "scheduled",
            CallbackStatus::Completed => "completed",
            CallbackStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ============ Database Models ============

/// A service professional that can be discovered, contacted and rated.
///
/// `average_score` is derived by the rating aggregator and is never written
/// by request handlers.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Representative {
    pub id: Uuid,
    pub display_name: String,
    pub role: TargetRole,
    pub headline: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub is_available: bool,
    /// Owned by the account system.
    pub is_approved: bool,
    /// Owned by the account system.
    pub is_active: bool,
    pub average_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Representative {
    /// Recorded location, if both halves are present and in range.
    pub fn location(&self) -> Option<Coordinate> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon).ok(),
            _ => None,
        }
    }

    /// Whether the representative may appear in discovery results at all.
    pub fn is_discoverable(&self) -> bool {
        self.is_available && self.is_approved && self.is_active && self.location().is_some()
    }

    /// Whether the account system lets this representative take requests.
    pub fn is_enabled(&self) -> bool {
        self.is_approved && self.is_active
    }
}

/// A contact request from a client to a representative.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub id: Uuid,
    pub representative_id: Uuid,
    pub requester_id: Option<Uuid>,
    pub requester_name: String,
    pub requester_phone: Option<String>,
    pub requester_email: Option<String>,
    pub purpose: String,
    pub status: CallbackStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for creating a callback request.
#[derive(Debug, Clone)]
pub struct NewCallbackRequest {
    pub representative_id: Uuid,
    pub requester_id: Option<Uuid>,
    pub requester_name: String,
    pub requester_phone: Option<String>,
    pub requester_email: Option<String>,
    pub purpose: String,
}

/// Identifies the entity a rating is submitted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetKey {
    pub target_id: Uuid,
    pub target_role: TargetRole,
}

impl TargetKey {
    pub fn new(target_id: Uuid, target_role: TargetRole) -> Self {
        Self {
            target_id,
            target_role,
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_role, self.target_id)
    }
}

/// A rating of a target. Anonymous ratings carry a name and email instead of a rater id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: Uuid,
    pub target_id: Uuid,
    pub target_role: TargetRole,
    pub rater_id: Option<Uuid>,
    pub rater_name: Option<String>,
    pub rater_email: Option<String>,
    pub score: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Rating {
    pub fn target(&self) -> TargetKey {
        TargetKey::new(self.target_id, self.target_role)
    }
}

/// Validated input for creating a rating.
#[derive(Debug, Clone)]
pub struct NewRating {
    pub target: TargetKey,
    pub rater_id: Option<Uuid>,
    pub rater_name: Option<String>,
    pub rater_email: Option<String>,
    pub score: i16,
    pub comment: Option<String>,
    pub question_scores: Vec<QuestionScore>,
}

/// One per-question score supplied with a rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionScore {
    pub question_id: Uuid,
    pub score: i16,
}

/// Stored per-question score, keyed by (rating_id, question_id).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRating {
    pub id: Uuid,
    pub rating_id: Uuid,
    pub question_id: Uuid,
    pub score: i16,
}

/// A question shown to raters of a given role. Read-only for this service.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingQuestion {
    pub id: Uuid,
    pub target_role: TargetRole,
    pub question_text: String,
    pub display_order: i32,
    pub is_active: bool,
}

/// One row of a question's score history.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionHistoryEntry {
    pub rating_id: Uuid,
    pub target_id: Uuid,
    pub target_role: TargetRole,
    pub score: i16,
    pub created_at: DateTime<Utc>,
}

// ============ API Request/Response Models ============

/// Query parameters for `GET /agents/nearby`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub radius_km: Option<f64>,
    pub limit: Option<i64>,
}

/// A search hit: the representative's public profile plus its distance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NearbyRepresentative {
    pub representative_id: Uuid,
    pub distance_km: f64,
    pub display_name: String,
    pub role: TargetRole,
    pub headline: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub average_score: Option<f64>,
    pub location_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityUpdate {
    pub available: bool,
}

/// Body of `POST /callbacks`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallbackPayload {
    pub representative_id: Option<Uuid>,
    pub requester_name: Option<String>,
    pub requester_phone: Option<String>,
    pub requester_email: Option<String>,
    pub purpose: Option<String>,
}

/// Body of `PATCH /callbacks/{id}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCallbackPayload {
    pub status: CallbackStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackListQuery {
    pub status: Option<CallbackStatus>,
}

/// Body of `POST /ratings`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRatingPayload {
    pub target_id: Option<Uuid>,
    pub target_role: Option<TargetRole>,
    pub score: Option<i64>,
    #[serde(default)]
    pub question_scores: Vec<QuestionScorePayload>,
    pub rater_name: Option<String>,
    pub rater_email: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionScorePayload {
    pub question_id: Uuid,
    pub score: i64,
}

/// Body of `PATCH /ratings/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRatingPayload {
    pub score: Option<i64>,
    pub comment: Option<String>,
}

/// A rating as returned after submission or edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingResponse {
    #[serde(flatten)]
    pub rating: Rating,
    pub question_scores: Vec<QuestionRating>,
    /// Target average after this change was aggregated.
    pub target_average: Option<f64>,
}

/// Summary of a target's ratings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub target_id: Uuid,
    pub target_role: TargetRole,
    pub average_score: Option<f64>,
    pub count: usize,
    /// Number of ratings per score, index 0 is score 1.
    pub distribution: [usize; 5],
    pub ratings: Vec<Rating>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionListQuery {
    pub role: TargetRole,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionHistoryQuery {
    pub target_id: Option<Uuid>,
    pub target_role: Option<TargetRole>,
}

/// Per-question history with a mean computed at read time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionHistory {
    pub question_id: Uuid,
    pub count: usize,
    pub mean: Option<f64>,
    pub entries: Vec<QuestionHistoryEntry>,
}
