//! Patient-data authorization cascade.
//!
//! 1. Own data → FULL ACCESS
//! 2. Active care grant → GRANTED LEVEL
//! 3. Default → DENY
//!
//! Default-deny, checked in order. Unidirectional: Alice granting Bob
//! says nothing about Bob granting Alice.

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository::care_grant::active_grant_level;
use crate::error::EngineError;

/// Access level granted to an actor over a patient's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Full,
    ReadOnly,
}

impl AccessLevel {
    /// Parse from database string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "read_only" => Some(Self::ReadOnly),
            _ => None,
        }
    }

    /// Database string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::ReadOnly => "read_only",
        }
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Why access was granted (or denied) — for audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessReason {
    /// Actor accessing their own data.
    OwnData,
    /// Active row in care_grants.
    CareGrant,
    /// No matching rule — access denied.
    Denied,
}

/// Result of an authorization check.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub level: AccessLevel,
    pub reason: AccessReason,
}

impl AccessDecision {
    fn allow(level: AccessLevel, reason: AccessReason) -> Self {
        Self {
            allowed: true,
            level,
            reason,
        }
    }

    fn deny() -> Self {
        Self {
            allowed: false,
            level: AccessLevel::ReadOnly,
            reason: AccessReason::Denied,
        }
    }
}

/// Check whether `actor_id` may access `patient_id`'s data.
pub fn check_patient_access(
    conn: &Connection,
    actor_id: &Uuid,
    patient_id: &Uuid,
) -> Result<AccessDecision, EngineError> {
    // Rule 1: Own data
    if actor_id == patient_id {
        return Ok(AccessDecision::allow(AccessLevel::Full, AccessReason::OwnData));
    }

    // Rule 2: Active care grant
    if let Some(level_str) = active_grant_level(conn, patient_id, actor_id)? {
        if let Some(level) = AccessLevel::from_str(&level_str) {
            return Ok(AccessDecision::allow(level, AccessReason::CareGrant));
        }
    }

    // Rule 3: Default deny
    Ok(AccessDecision::deny())
}

/// Like [`check_patient_access`] but turns denial into an error, for
/// call sites that have no use for a partial decision.
pub fn require_access(
    conn: &Connection,
    actor_id: &Uuid,
    patient_id: &Uuid,
    write: bool,
) -> Result<AccessDecision, EngineError> {
    let decision = check_patient_access(conn, actor_id, patient_id)?;
    if !decision.allowed {
        return Err(EngineError::PermissionDenied(format!(
            "actor {actor_id} has no access to patient {patient_id}"
        )));
    }
    if write && !decision.level.can_write() {
        return Err(EngineError::PermissionDenied(format!(
            "actor {actor_id} has read-only access to patient {patient_id}"
        )));
    }
    Ok(decision)
}
