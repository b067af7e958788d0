//! Caller identity as asserted by the upstream authentication gateway.
//!
//! Authentication itself happens before requests reach this service; the
//! gateway forwards the resolved identity in `X-Caller-Id` / `X-Caller-Role`.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::AppError;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRole {
    Admin,
    /// An agent or employee acting on their own records.
    Representative,
    Client,
    Anonymous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: Option<Uuid>,
    pub role: CallerRole,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            role: CallerRole::Anonymous,
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self {
            id: Some(id),
            role: CallerRole::Admin,
        }
    }

    pub fn representative(id: Uuid) -> Self {
        Self {
            id: Some(id),
            role: CallerRole::Representative,
        }
    }

    pub fn client(id: Uuid) -> Self {
        Self {
            id: Some(id),
            role: CallerRole::Client,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == CallerRole::Admin
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.is_some() && self.role != CallerRole::Anonymous
    }

    /// Admins, or the representative whose id is `owner`.
    pub fn may_act_for(&self, owner: Uuid) -> bool {
        match self.role {
            CallerRole::Admin => true,
            CallerRole::Representative => self.id == Some(owner),
            _ => false,
        }
    }

    /// Fails with `Forbidden` unless [`Caller::may_act_for`] holds.
    pub fn ensure_may_act_for(&self, owner: Uuid, what: &str) -> Result<(), AppError> {
        if self.may_act_for(owner) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "caller {:?} may not modify {}",
                self.id, what
            )))
        }
    }

    pub fn ensure_admin(&self, what: &str) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("{} requires an administrator", what)))
        }
    }

    /// Parses the identity headers. Missing headers mean an anonymous caller.
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Result<Self, AppError> {
        let header = |name: &str| -> Result<Option<String>, AppError> {
            headers
                .get(name)
                .map(|v| {
                    v.to_str()
                        .map(|s| s.trim().to_string())
                        .map_err(|_| AppError::Validation(format!("{} is not valid text", name)))
                })
                .transpose()
        };

        let id = header(CALLER_ID_HEADER)?
            .filter(|s| !s.is_empty())
            .map(|raw| {
                Uuid::parse_str(&raw)
                    .map_err(|_| AppError::Validation(format!("{} must be a UUID", CALLER_ID_HEADER)))
            })
            .transpose()?;

        let role = match header(CALLER_ROLE_HEADER)?.as_deref().map(str::to_ascii_lowercase) {
            None => None,
            Some(role) => Some(match role.as_str() {
                "admin" => CallerRole::Admin,
                "agent" | "employee" | "representative" => CallerRole::Representative,
                "client" => CallerRole::Client,
                other => {
                    return Err(AppError::Validation(format!(
                        "unknown caller role '{}'",
                        other
                    )))
                }
            }),
        };

        match (id, role) {
            (None, None) => Ok(Self::anonymous()),
            (Some(id), Some(role)) => Ok(Self { id: Some(id), role }),
            (Some(_), None) => Err(AppError::Validation(format!(
                "{} requires {}",
                CALLER_ID_HEADER, CALLER_ROLE_HEADER
            ))),
            (None, Some(_)) => Err(AppError::Validation(format!(
                "{} requires {}",
                CALLER_ROLE_HEADER, CALLER_ID_HEADER
            ))),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Caller::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn test_missing_headers_is_anonymous() {
        let caller = Caller::from_headers(&HeaderMap::new()).unwrap();
        assert_eq!(caller, Caller::anonymous());
        assert!(!caller.is_authenticated());
    }

    #[test]
    fn test_parses_representative() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(CALLER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers.insert(CALLER_ROLE_HEADER, HeaderValue::from_static("Employee"));

        let caller = Caller::from_headers(&headers).unwrap();
        assert_eq!(caller, Caller::representative(id));
        assert!(caller.may_act_for(id));
        assert!(!caller.may_act_for(Uuid::new_v4()));
    }

    #[test]
    fn test_rejects_half_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(CALLER_ROLE_HEADER, HeaderValue::from_static("admin"));
        assert!(Caller::from_headers(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(CALLER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        headers.insert(CALLER_ROLE_HEADER, HeaderValue::from_static("admin"));
        assert!(Caller::from_headers(&headers).is_err());
    }

    #[test]
    fn test_clients_never_act_for_anyone() {
        let id = Uuid::new_v4();
        assert!(!Caller::client(id).may_act_for(id));
        assert!(Caller::admin(Uuid::new_v4()).may_act_for(id));
    }
}
