use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError},
};

/// Precondition violations surfaced to clients as 400 with a descriptive reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    /// The group already holds the maximum number of members.
    #[error("group is full")]
    GroupFull,
    /// The player is already a member of the group.
    #[error("player is already a member of this group")]
    AlreadyMember,
    /// The group has an unfinished level.
    #[error("a session is already open for this group")]
    SessionAlreadyOpen,
    /// At least one member is not ready.
    #[error("not every member is ready")]
    NotAllReady,
    /// Too few members to start.
    #[error("at least {0} members are required")]
    InsufficientPlayers(usize),
    /// Every theme of the catalog was already played by the group.
    #[error("no theme available")]
    NoThemeAvailable,
    /// The group has no current level to finish.
    #[error("group has no current level")]
    NoCurrentLevel,
    /// Lifecycle rejected the action in the current phase.
    #[error("{0}")]
    InvalidTransition(String),
    /// Storage rejected a write because of a uniqueness constraint.
    #[error("{0}")]
    Storage(String),
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A precondition of the action does not hold.
    #[error("{0}")]
    Conflict(#[from] Conflict),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StorageError::Conflict { message } => ServiceError::Conflict(Conflict::Storage(message)),
            unavailable @ StorageError::Unavailable { .. } => ServiceError::Unavailable(unavailable),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request: malformed input or violated precondition.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Infrastructure failure (storage unreachable, degraded, timeout).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status associated with the error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::Internal(source.to_string()),
            ServiceError::Degraded => AppError::Internal("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Conflict(conflict) => AppError::BadRequest(conflict.to_string()),
            ServiceError::Timeout => AppError::Internal("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (self.status(), payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => ServiceError::Conflict(Conflict::InvalidTransition(
                "state transition already pending".into(),
            )),
            PlanError::InvalidTransition(invalid) => {
                ServiceError::Conflict(Conflict::InvalidTransition(invalid.to_string()))
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        let message = match err {
            ApplyError::NoPending => "no transition is pending".to_owned(),
            ApplyError::IdMismatch { .. } => "pending transition does not match".to_owned(),
            ApplyError::PhaseMismatch { expected, actual } => format!(
                "state changed during transition (expected {expected:?}, got {actual:?})"
            ),
            ApplyError::VersionMismatch { expected, actual } => format!(
                "state version mismatch during transition (expected {expected}, got {actual})"
            ),
        };
        ServiceError::Conflict(Conflict::InvalidTransition(message))
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        let message = match err {
            AbortError::NoPending => "no pending transition",
            AbortError::IdMismatch { .. } => "transition plan does not match",
        };
        ServiceError::Conflict(Conflict::InvalidTransition(message.to_owned()))
    }
}
