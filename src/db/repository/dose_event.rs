use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::DoseStatus;
use crate::models::DoseEvent;

use super::medication::parse_uuid;
use super::reminder::parse_date;

pub(crate) const DOSE_EVENT_COLUMNS: &str =
    "id, patient_id, medication_id, reminder_id, scheduled_date, scheduled_time,
     dose_quantity, status, taken_at, snooze_until, snooze_count, stock_shortfall, version";

/// Insert a dose event unless one already exists for the same
/// (reminder, date, time-of-day). Returns whether a row was created —
/// this is what makes compiler re-runs and races duplicate-safe.
pub fn insert_dose_event_if_absent(
    conn: &Connection,
    event: &DoseEvent,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO dose_events (id, patient_id, medication_id, reminder_id,
         scheduled_date, scheduled_time, dose_quantity, status, taken_at, snooze_until,
         snooze_count, stock_shortfall, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            event.id.to_string(),
            event.patient_id.to_string(),
            event.medication_id.to_string(),
            event.reminder_id.to_string(),
            event.scheduled_date.to_string(),
            event.scheduled_time.format("%H:%M").to_string(),
            event.dose_quantity,
            event.status.as_str(),
            event.taken_at.map(format_datetime),
            event.snooze_until.map(format_datetime),
            event.snooze_count,
            event.stock_shortfall,
            event.version,
        ],
    )?;
    Ok(inserted == 1)
}

pub fn get_dose_event(
    conn: &Connection,
    event_id: &Uuid,
) -> Result<Option<DoseEvent>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {DOSE_EVENT_COLUMNS} FROM dose_events WHERE id = ?1"),
        params![event_id.to_string()],
        dose_event_row,
    );
    match result {
        Ok(row) => Ok(Some(dose_event_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// The new state a transition writes. `version` is not here — it is the
/// gate, not a payload field.
#[derive(Debug, Clone)]
pub struct TransitionUpdate {
    pub status: DoseStatus,
    pub taken_at: Option<NaiveDateTime>,
    pub snooze_until: Option<NaiveDateTime>,
    pub snooze_count: u32,
    pub stock_shortfall: f64,
}

/// Version-gated state write. Returns false when another writer got
/// there first (the row's version no longer matches) — the caller then
/// reloads and decides between idempotent no-op and conflict.
pub fn apply_transition(
    conn: &Connection,
    event_id: &Uuid,
    expected_version: i64,
    update: &TransitionUpdate,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE dose_events SET status = ?1, taken_at = ?2, snooze_until = ?3,
         snooze_count = ?4, stock_shortfall = ?5, version = version + 1
         WHERE id = ?6 AND version = ?7",
        params![
            update.status.as_str(),
            update.taken_at.map(format_datetime),
            update.snooze_until.map(format_datetime),
            update.snooze_count,
            update.stock_shortfall,
            event_id.to_string(),
            expected_version,
        ],
    )?;
    Ok(changed == 1)
}

/// Events for a patient within an inclusive date range, in schedule order.
pub fn events_between(
    conn: &Connection,
    patient_id: &Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DoseEvent>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOSE_EVENT_COLUMNS} FROM dose_events
         WHERE patient_id = ?1 AND scheduled_date >= ?2 AND scheduled_date <= ?3
         ORDER BY scheduled_date ASC, scheduled_time ASC"
    ))?;
    let events = collect_events(stmt.query_map(
        params![patient_id.to_string(), from.to_string(), to.to_string()],
        dose_event_row,
    )?);
    events
}

pub fn recent_events(
    conn: &Connection,
    patient_id: &Uuid,
    limit: u32,
) -> Result<Vec<DoseEvent>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOSE_EVENT_COLUMNS} FROM dose_events
         WHERE patient_id = ?1
         ORDER BY scheduled_date DESC, scheduled_time DESC
         LIMIT ?2"
    ))?;
    let events =
        collect_events(stmt.query_map(params![patient_id.to_string(), limit], dose_event_row)?);
    events
}

/// Non-terminal events whose scheduled date fully elapsed before
/// `before` — the finalization sweep's work list. Optionally sharded
/// by patient; shards need no cross-patient coordination.
pub fn nonterminal_elapsed(
    conn: &Connection,
    patient_id: Option<&Uuid>,
    before: NaiveDate,
) -> Result<Vec<DoseEvent>, DatabaseError> {
    let sql = format!(
        "SELECT {DOSE_EVENT_COLUMNS} FROM dose_events
         WHERE status IN ('pending', 'snoozed') AND scheduled_date < ?1
           AND (?2 IS NULL OR patient_id = ?2)
         ORDER BY scheduled_date ASC, scheduled_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let events = collect_events(stmt.query_map(
        params![before.to_string(), patient_id.map(|id| id.to_string())],
        dose_event_row,
    )?);
    events
}

/// Events awaiting action: pending past their scheduled moment, or
/// snoozed past their deferral.
pub fn due_events(
    conn: &Connection,
    patient_id: &Uuid,
    now: NaiveDateTime,
) -> Result<Vec<DoseEvent>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOSE_EVENT_COLUMNS} FROM dose_events
         WHERE patient_id = ?1
           AND ((status = 'pending'
                 AND (scheduled_date < ?2
                      OR (scheduled_date = ?2 AND scheduled_time <= ?3)))
                OR (status = 'snoozed' AND snooze_until <= ?4))
         ORDER BY scheduled_date ASC, scheduled_time ASC"
    ))?;
    let events = collect_events(stmt.query_map(
        params![
            patient_id.to_string(),
            now.date().to_string(),
            now.time().format("%H:%M").to_string(),
            format_datetime(now),
        ],
        dose_event_row,
    )?);
    events
}

/// Snoozed events whose deferral has expired.
pub fn snooze_expired(
    conn: &Connection,
    now: NaiveDateTime,
) -> Result<Vec<DoseEvent>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOSE_EVENT_COLUMNS} FROM dose_events
         WHERE status = 'snoozed' AND snooze_until <= ?1
         ORDER BY snooze_until ASC"
    ))?;
    let events = collect_events(stmt.query_map(params![format_datetime(now)], dose_event_row)?);
    events
}

/// Drop not-yet-acted events from `from_date` onward for a reminder.
/// Past and terminal rows stay — the ledger never loses history.
pub fn delete_future_unacted(
    conn: &Connection,
    reminder_id: &Uuid,
    from_date: NaiveDate,
) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM dose_events
         WHERE reminder_id = ?1 AND scheduled_date >= ?2
           AND status IN ('pending', 'snoozed')",
        params![reminder_id.to_string(), from_date.to_string()],
    )?;
    Ok(deleted)
}

pub fn count_events_for_reminder(
    conn: &Connection,
    reminder_id: &Uuid,
) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM dose_events WHERE reminder_id = ?1",
        params![reminder_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub(crate) fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn parse_datetime(s: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

pub(crate) struct DoseEventRow {
    id: String,
    patient_id: String,
    medication_id: String,
    reminder_id: String,
    scheduled_date: String,
    scheduled_time: String,
    dose_quantity: f64,
    status: String,
    taken_at: Option<String>,
    snooze_until: Option<String>,
    snooze_count: u32,
    stock_shortfall: f64,
    version: i64,
}

pub(crate) fn dose_event_row(row: &rusqlite::Row<'_>) -> Result<DoseEventRow, rusqlite::Error> {
    Ok(DoseEventRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        medication_id: row.get(2)?,
        reminder_id: row.get(3)?,
        scheduled_date: row.get(4)?,
        scheduled_time: row.get(5)?,
        dose_quantity: row.get(6)?,
        status: row.get(7)?,
        taken_at: row.get(8)?,
        snooze_until: row.get(9)?,
        snooze_count: row.get(10)?,
        stock_shortfall: row.get(11)?,
        version: row.get(12)?,
    })
}

pub(crate) fn dose_event_from_row(row: DoseEventRow) -> Result<DoseEvent, DatabaseError> {
    Ok(DoseEvent {
        id: parse_uuid(&row.id)?,
        patient_id: parse_uuid(&row.patient_id)?,
        medication_id: parse_uuid(&row.medication_id)?,
        reminder_id: parse_uuid(&row.reminder_id)?,
        scheduled_date: parse_date(&row.scheduled_date)?,
        scheduled_time: NaiveTime::parse_from_str(&row.scheduled_time, "%H:%M")
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        dose_quantity: row.dose_quantity,
        status: DoseStatus::from_str(&row.status)?,
        taken_at: row.taken_at.as_deref().map(parse_datetime).transpose()?,
        snooze_until: row.snooze_until.as_deref().map(parse_datetime).transpose()?,
        snooze_count: row.snooze_count,
        stock_shortfall: row.stock_shortfall,
        version: row.version,
    })
}

pub(crate) fn collect_events<I>(rows: I) -> Result<Vec<DoseEvent>, DatabaseError>
where
    I: Iterator<Item = Result<DoseEventRow, rusqlite::Error>>,
{
    let mut events = Vec::new();
    for row in rows {
        events.push(dose_event_from_row(row?)?);
    }
    Ok(events)
}
