use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Daypart, ReminderMode};

/// A declarative dosing schedule for one medication: N times per day,
/// every day, between an inclusive start and end date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub mode: ReminderMode,
    pub voice_profile: Option<String>,
    pub note: Option<String>,
    pub created_by: Uuid,
    pub deleted: bool,
}

/// One time-of-day slot in a reminder, tagged with a daypart label and
/// the dosage dispensed at that slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseTime {
    pub id: Uuid,
    pub reminder_id: Uuid,
    pub daypart: Daypart,
    pub time_of_day: NaiveTime,
    pub dose_quantity: f64,
}

/// Input for creating or replacing a reminder.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReminder {
    pub medication_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub mode: ReminderMode,
    pub voice_profile: Option<String>,
    pub note: Option<String>,
    pub times: Vec<NewDoseTime>,
}

/// Input for editing an existing reminder. The time set is replaced
/// wholesale; future not-yet-acted events are regenerated from it.
#[derive(Debug, Clone, Deserialize)]
pub struct ReminderUpdate {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub mode: ReminderMode,
    pub voice_profile: Option<String>,
    pub note: Option<String>,
    pub times: Vec<NewDoseTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDoseTime {
    pub daypart: Daypart,
    pub time_of_day: NaiveTime,
    pub dose_quantity: f64,
}

/// A reminder together with its time slots, as the compiler consumes it.
#[derive(Debug, Clone, Serialize)]
pub struct ReminderSchedule {
    pub reminder: Reminder,
    pub times: Vec<DoseTime>,
}
