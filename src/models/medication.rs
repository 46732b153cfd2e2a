use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::CreatorRole;

/// A medication owned by a patient account.
///
/// `total_quantity` is a high-water mark: raised by restocks, never
/// decremented. `remaining_quantity` moves between 0 and that mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub name: String,
    pub dose_form: String,
    pub total_quantity: f64,
    pub remaining_quantity: f64,
    pub low_stock_threshold: f64,
    pub note: Option<String>,
    pub created_by: Uuid,
    pub creator_role: CreatorRole,
    pub created_at: NaiveDateTime,
    pub deleted: bool,
}

impl Medication {
    /// Derived predicate, recomputed on every read — never stored.
    pub fn is_low_stock(&self) -> bool {
        self.remaining_quantity <= self.low_stock_threshold
    }
}

/// Input for creating a medication.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMedication {
    pub name: String,
    pub dose_form: String,
    pub total_quantity: f64,
    pub low_stock_threshold: f64,
    pub note: Option<String>,
}

/// Editable medication fields (quantities move only through the
/// inventory ledger).
#[derive(Debug, Clone, Deserialize)]
pub struct MedicationUpdate {
    pub name: Option<String>,
    pub dose_form: Option<String>,
    pub note: Option<String>,
}
