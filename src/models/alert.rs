use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AlertKind;

/// A row in the alert feed polled by the external push-notification
/// collaborator. The engine records the fact; delivery happens outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineAlert {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub medication_id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub created_at: NaiveDateTime,
    pub delivered: bool,
}
