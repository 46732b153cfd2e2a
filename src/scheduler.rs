//! Schedule compiler — expands reminder definitions into concrete dose
//! events over a rolling horizon.
//!
//! Compilation is idempotent: event creation is keyed by the
//! (reminder, date, time-of-day) uniqueness constraint, so re-runs and
//! concurrent triggers produce at most one surviving row per slot.

use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::EnginePolicy;
use crate::db::repository::dose_event::insert_dose_event_if_absent;
use crate::db::repository::medication::get_live_medication;
use crate::db::repository::reminder::{get_schedule, list_live_schedules};
use crate::error::EngineError;
use crate::models::enums::DoseStatus;
use crate::models::{DoseEvent, ReminderSchedule};

/// Compile one reminder over `[max(start, today), min(end, today + horizon)]`.
/// Returns how many new pending events were created.
pub fn compile_reminder(
    conn: &Connection,
    reminder_id: &Uuid,
    today: NaiveDate,
    policy: &EnginePolicy,
) -> Result<u32, EngineError> {
    let schedule = get_schedule(conn, reminder_id)?
        .filter(|s| !s.reminder.deleted)
        .ok_or(EngineError::NotFound {
            entity: "reminder",
            id: reminder_id.to_string(),
        })?;
    compile_schedule(conn, &schedule, today, policy)
}

/// Periodic incremental run: extend the horizon for every live
/// reminder. Safe to invoke redundantly from multiple triggers.
pub fn extend_horizons(
    conn: &Connection,
    today: NaiveDate,
    policy: &EnginePolicy,
) -> Result<u32, EngineError> {
    let mut created = 0;
    for schedule in list_live_schedules(conn, today)? {
        created += compile_schedule(conn, &schedule, today, policy)?;
    }
    if created > 0 {
        tracing::info!(created, "Extended dose-event horizon");
    }
    Ok(created)
}

pub(crate) fn compile_schedule(
    conn: &Connection,
    schedule: &ReminderSchedule,
    today: NaiveDate,
    policy: &EnginePolicy,
) -> Result<u32, EngineError> {
    let reminder = &schedule.reminder;
    let medication = get_live_medication(conn, &reminder.medication_id)?.ok_or(
        EngineError::NotFound {
            entity: "medication",
            id: reminder.medication_id.to_string(),
        },
    )?;

    let from = reminder.start_date.max(today);
    let to = reminder
        .end_date
        .min(today + Duration::days(policy.horizon_days));
    if from > to {
        return Ok(0);
    }

    let mut created = 0;
    let mut day = from;
    while day <= to {
        for slot in &schedule.times {
            let event = DoseEvent {
                id: Uuid::new_v4(),
                patient_id: medication.patient_id,
                medication_id: medication.id,
                reminder_id: reminder.id,
                scheduled_date: day,
                scheduled_time: slot.time_of_day,
                dose_quantity: slot.dose_quantity,
                status: DoseStatus::Pending,
                taken_at: None,
                snooze_until: None,
                snooze_count: 0,
                stock_shortfall: 0.0,
                version: 1,
            };
            if insert_dose_event_if_absent(conn, &event)? {
                created += 1;
            }
        }
        day += Duration::days(1);
    }

    tracing::debug!(
        reminder_id = %reminder.id,
        from = %from,
        to = %to,
        created,
        "Compiled reminder"
    );
    Ok(created)
}
