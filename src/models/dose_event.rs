use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::DoseStatus;

/// One scheduled occurrence of taking a medication — the unit of
/// adherence tracking. Created by the schedule compiler, mutated only
/// through the version-gated state machine, never deleted once past.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseEvent {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub medication_id: Uuid,
    pub reminder_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub dose_quantity: f64,
    pub status: DoseStatus,
    pub taken_at: Option<NaiveDateTime>,
    pub snooze_until: Option<NaiveDateTime>,
    pub snooze_count: u32,
    /// Quantity the inventory could not cover when this dose was taken.
    pub stock_shortfall: f64,
    /// Optimistic-concurrency token; bumped on every transition.
    pub version: i64,
}

impl DoseEvent {
    /// The scheduled moment as a full timestamp.
    pub fn scheduled_at(&self) -> NaiveDateTime {
        self.scheduled_date.and_time(self.scheduled_time)
    }
}

/// Outcome of a submitted dose action: the updated event plus an
/// optional stock fault. Adherence truth and inventory truth are
/// decoupled — a shortfall warns, it never blocks the transition.
#[derive(Debug, Clone, Serialize)]
pub struct DoseActionOutcome {
    pub event: DoseEvent,
    pub stock_warning: Option<StockWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockWarning {
    pub medication_id: Uuid,
    pub requested: f64,
    pub available: f64,
}
