//! Engine error taxonomy.
//!
//! Every rejected mutation carries a stable kind plus a human-readable
//! reason. Duplicate idempotent submissions return the original success,
//! not an error; `InsufficientStock` is a soft fault attached to a
//! successful adherence transition, never a rejection of it.

use uuid::Uuid;

use crate::db::DatabaseError;
use crate::entitlement::Feature;
use crate::models::DoseStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid transition: dose event is already {} and cannot become {requested}", from.as_str())]
    InvalidTransition {
        from: DoseStatus,
        requested: &'static str,
    },

    #[error("Snooze limit exceeded: dose already snoozed {max} times")]
    SnoozeLimitExceeded { max: u32 },

    #[error("Insufficient stock for medication {medication_id}: requested {requested}, {available} available")]
    InsufficientStock {
        medication_id: Uuid,
        requested: f64,
        available: f64,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Subscription required for {}", feature.as_str())]
    SubscriptionRequired { feature: Feature },

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl EngineError {
    /// Stable machine-readable code for API surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::SnoozeLimitExceeded { .. } => "SNOOZE_LIMIT_EXCEEDED",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::SubscriptionRequired { .. } => "SUBSCRIPTION_REQUIRED",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "INTERNAL",
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::from(err))
    }
}
