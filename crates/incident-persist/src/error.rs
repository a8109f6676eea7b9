//! Storage-layer error types.
//!
//! Each aggregate gets its own error enum so a store implementation can
//! report exactly what went wrong without forcing every caller through a
//! single catch-all variant. Every variant converts to the platform
//! [`ApiError`] via `into_api_error`, which service crates call at the HTTP
//! boundary.

use incident_core::ApiError;
use incident_core::types::incident::IllegalTransition;
use incident_core::types::oncall::NoPrimaryError;

#[derive(Debug, thiserror::Error)]
pub enum AlertStoreError {
    #[error("alert not found")]
    NotFound,
    #[error("backend error: {0}")]
    Backend(String),
}

impl AlertStoreError {
    pub fn into_api_error(self) -> ApiError {
        match self {
            Self::NotFound => ApiError::NotFound("alert not found".into()),
            Self::Backend(msg) => ApiError::Unavailable(msg),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IncidentStoreError {
    #[error("incident not found")]
    NotFound,
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("backend error: {0}")]
    Backend(String),
}

impl IncidentStoreError {
    pub fn into_api_error(self) -> ApiError {
        match self {
            Self::NotFound => ApiError::NotFound("incident not found".into()),
            Self::IllegalTransition(e) => ApiError::Conflict(e.to_string()),
            Self::Backend(msg) => ApiError::Unavailable(msg),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OnCallStoreError {
    #[error("schedule not found for team")]
    ScheduleNotFound,
    #[error(transparent)]
    NoPrimary(#[from] NoPrimaryError),
    #[error("backend error: {0}")]
    Backend(String),
}

impl OnCallStoreError {
    pub fn into_api_error(self) -> ApiError {
        match self {
            Self::ScheduleNotFound => ApiError::NotFound("schedule not found".into()),
            Self::NoPrimary(e) => ApiError::Validation(e.to_string()),
            Self::Backend(msg) => ApiError::Unavailable(msg),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationStoreError {
    #[error("notification not found")]
    NotFound,
    #[error("backend error: {0}")]
    Backend(String),
}

impl NotificationStoreError {
    pub fn into_api_error(self) -> ApiError {
        match self {
            Self::NotFound => ApiError::NotFound("notification not found".into()),
            Self::Backend(msg) => ApiError::Unavailable(msg),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AlertStoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for IncidentStoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
