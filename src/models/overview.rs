use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dose_event::DoseEvent;

/// Per-day terminal counts for one calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounts {
    pub on_time: u32,
    pub late: u32,
    pub missed: u32,
    pub skipped: u32,
}

/// One day of a weekly overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayAdherence {
    pub date: NaiveDate,
    pub counts: DayCounts,
}

/// Daily breakdown for a single medication across the week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationWeekly {
    pub medication_id: Uuid,
    pub medication_name: String,
    pub days: Vec<DayAdherence>,
}

/// Weekly adherence projection: 7 calendar days starting at `week_start`,
/// across all of the patient's medications, plus a per-medication split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyOverview {
    pub week_start: NaiveDate,
    pub days: Vec<DayAdherence>,
    pub medications: Vec<MedicationWeekly>,
}

/// Lifetime adherence projection.
#[derive(Debug, Clone, Serialize)]
pub struct FullOverview {
    pub total_events: u32,
    pub on_time: u32,
    pub late: u32,
    pub missed: u32,
    pub skipped: u32,
    /// `round((on_time + late) / terminal_total × 100)`; 0 when no
    /// terminal events exist yet.
    pub adherence_rate: u32,
    pub recent_events: Vec<DoseEvent>,
}
