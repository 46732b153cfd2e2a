use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::{Daypart, ReminderMode};
use crate::models::{DoseTime, Reminder, ReminderSchedule};

use super::medication::parse_uuid;

const REMINDER_COLUMNS: &str =
    "id, medication_id, start_date, end_date, mode, voice_profile, note, created_by, deleted";

pub fn insert_reminder(conn: &Connection, reminder: &Reminder) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reminders (id, medication_id, start_date, end_date, mode,
         voice_profile, note, created_by, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            reminder.id.to_string(),
            reminder.medication_id.to_string(),
            reminder.start_date.to_string(),
            reminder.end_date.to_string(),
            reminder.mode.as_str(),
            reminder.voice_profile,
            reminder.note,
            reminder.created_by.to_string(),
            reminder.deleted as i32,
        ],
    )?;
    Ok(())
}

pub fn insert_dose_time(conn: &Connection, time: &DoseTime) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reminder_times (id, reminder_id, daypart, time_of_day, dose_quantity)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            time.id.to_string(),
            time.reminder_id.to_string(),
            time.daypart.as_str(),
            time.time_of_day.format("%H:%M").to_string(),
            time.dose_quantity,
        ],
    )?;
    Ok(())
}

pub fn get_reminder(
    conn: &Connection,
    reminder_id: &Uuid,
) -> Result<Option<Reminder>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
        params![reminder_id.to_string()],
        reminder_row,
    );
    match result {
        Ok(row) => Ok(Some(reminder_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

pub fn get_dose_times(
    conn: &Connection,
    reminder_id: &Uuid,
) -> Result<Vec<DoseTime>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, reminder_id, daypart, time_of_day, dose_quantity
         FROM reminder_times WHERE reminder_id = ?1
         ORDER BY time_of_day ASC",
    )?;

    let rows = stmt.query_map(params![reminder_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, f64>(4)?,
        ))
    })?;

    let mut times = Vec::new();
    for row in rows {
        let (id, rid, daypart, time_of_day, dose_quantity) = row?;
        times.push(DoseTime {
            id: parse_uuid(&id)?,
            reminder_id: parse_uuid(&rid)?,
            daypart: Daypart::from_str(&daypart)?,
            time_of_day: NaiveTime::parse_from_str(&time_of_day, "%H:%M")
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            dose_quantity,
        });
    }
    Ok(times)
}

/// Reminder plus its time slots, as the schedule compiler consumes it.
pub fn get_schedule(
    conn: &Connection,
    reminder_id: &Uuid,
) -> Result<Option<ReminderSchedule>, DatabaseError> {
    match get_reminder(conn, reminder_id)? {
        Some(reminder) => {
            let times = get_dose_times(conn, &reminder.id)?;
            Ok(Some(ReminderSchedule { reminder, times }))
        }
        None => Ok(None),
    }
}

/// All live schedules whose date range has not fully elapsed.
/// Reminders of deleted medications are excluded — deleting a
/// medication stops generation without touching history.
pub fn list_live_schedules(
    conn: &Connection,
    as_of: NaiveDate,
) -> Result<Vec<ReminderSchedule>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REMINDER_COLUMNS} FROM reminders r
         WHERE r.deleted = 0 AND r.end_date >= ?1
           AND EXISTS (SELECT 1 FROM medications m
                       WHERE m.id = r.medication_id AND m.deleted = 0)"
    ))?;

    let rows = stmt.query_map(params![as_of.to_string()], reminder_row)?;

    let mut schedules = Vec::new();
    for row in rows {
        let reminder = reminder_from_row(row?)?;
        let times = get_dose_times(conn, &reminder.id)?;
        schedules.push(ReminderSchedule { reminder, times });
    }
    Ok(schedules)
}

pub fn list_reminders_for_medication(
    conn: &Connection,
    medication_id: &Uuid,
) -> Result<Vec<Reminder>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REMINDER_COLUMNS} FROM reminders
         WHERE medication_id = ?1 AND deleted = 0"
    ))?;

    let rows = stmt.query_map(params![medication_id.to_string()], reminder_row)?;

    let mut reminders = Vec::new();
    for row in rows {
        reminders.push(reminder_from_row(row?)?);
    }
    Ok(reminders)
}

pub fn update_reminder_fields(
    conn: &Connection,
    reminder: &Reminder,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminders SET start_date = ?1, end_date = ?2, mode = ?3,
         voice_profile = ?4, note = ?5
         WHERE id = ?6 AND deleted = 0",
        params![
            reminder.start_date.to_string(),
            reminder.end_date.to_string(),
            reminder.mode.as_str(),
            reminder.voice_profile,
            reminder.note,
            reminder.id.to_string(),
        ],
    )?;
    Ok(changed == 1)
}

/// Replace the full time-of-day set for a reminder.
pub fn replace_dose_times(
    conn: &Connection,
    reminder_id: &Uuid,
    times: &[DoseTime],
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM reminder_times WHERE reminder_id = ?1",
        params![reminder_id.to_string()],
    )?;
    for time in times {
        insert_dose_time(conn, time)?;
    }
    Ok(())
}

pub fn soft_delete_reminder(conn: &Connection, reminder_id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminders SET deleted = 1 WHERE id = ?1 AND deleted = 0",
        params![reminder_id.to_string()],
    )?;
    Ok(changed == 1)
}

struct ReminderRow {
    id: String,
    medication_id: String,
    start_date: String,
    end_date: String,
    mode: String,
    voice_profile: Option<String>,
    note: Option<String>,
    created_by: String,
    deleted: i32,
}

fn reminder_row(row: &rusqlite::Row<'_>) -> Result<ReminderRow, rusqlite::Error> {
    Ok(ReminderRow {
        id: row.get(0)?,
        medication_id: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        mode: row.get(4)?,
        voice_profile: row.get(5)?,
        note: row.get(6)?,
        created_by: row.get(7)?,
        deleted: row.get(8)?,
    })
}

fn reminder_from_row(row: ReminderRow) -> Result<Reminder, DatabaseError> {
    Ok(Reminder {
        id: parse_uuid(&row.id)?,
        medication_id: parse_uuid(&row.medication_id)?,
        start_date: parse_date(&row.start_date)?,
        end_date: parse_date(&row.end_date)?,
        mode: ReminderMode::from_str(&row.mode)?,
        voice_profile: row.voice_profile,
        note: row.note,
        created_by: parse_uuid(&row.created_by)?,
        deleted: row.deleted != 0,
    })
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::medication::insert_medication;
    use crate::db::sqlite::open_memory_database;
    use crate::test_support::{date, sample_medication, sample_reminder, time};

    #[test]
    fn insert_and_load_schedule() {
        let conn = open_memory_database().unwrap();
        let med = sample_medication(Uuid::new_v4(), 30.0, 5.0);
        insert_medication(&conn, &med).unwrap();

        let (reminder, times) = sample_reminder(
            &med,
            date(2024, 1, 1),
            date(2024, 1, 3),
            &[(Daypart::Morning, time(8, 0), 1.0), (Daypart::Evening, time(20, 0), 2.0)],
        );
        insert_reminder(&conn, &reminder).unwrap();
        for t in &times {
            insert_dose_time(&conn, t).unwrap();
        }

        let schedule = get_schedule(&conn, &reminder.id).unwrap().unwrap();
        assert_eq!(schedule.times.len(), 2);
        assert_eq!(schedule.times[0].time_of_day, time(8, 0));
        assert_eq!(schedule.times[1].dose_quantity, 2.0);
        assert_eq!(schedule.reminder.mode, ReminderMode::Silent);
    }

    #[test]
    fn duplicate_daypart_rejected_by_schema() {
        let conn = open_memory_database().unwrap();
        let med = sample_medication(Uuid::new_v4(), 30.0, 5.0);
        insert_medication(&conn, &med).unwrap();

        let (reminder, times) = sample_reminder(
            &med,
            date(2024, 1, 1),
            date(2024, 1, 3),
            &[(Daypart::Morning, time(8, 0), 1.0)],
        );
        insert_reminder(&conn, &reminder).unwrap();
        insert_dose_time(&conn, &times[0]).unwrap();

        let duplicate = DoseTime {
            id: Uuid::new_v4(),
            reminder_id: reminder.id,
            daypart: Daypart::Morning,
            time_of_day: time(9, 0),
            dose_quantity: 1.0,
        };
        assert!(insert_dose_time(&conn, &duplicate).is_err());
    }

    #[test]
    fn live_schedules_skip_deleted_and_elapsed() {
        let conn = open_memory_database().unwrap();
        let med = sample_medication(Uuid::new_v4(), 30.0, 5.0);
        insert_medication(&conn, &med).unwrap();

        let (current, current_times) = sample_reminder(
            &med,
            date(2024, 1, 1),
            date(2024, 2, 1),
            &[(Daypart::Morning, time(8, 0), 1.0)],
        );
        let (elapsed, _) = sample_reminder(
            &med,
            date(2023, 1, 1),
            date(2023, 2, 1),
            &[(Daypart::Morning, time(8, 0), 1.0)],
        );
        let (removed, _) = sample_reminder(
            &med,
            date(2024, 1, 1),
            date(2024, 2, 1),
            &[(Daypart::Morning, time(8, 0), 1.0)],
        );
        insert_reminder(&conn, &current).unwrap();
        insert_reminder(&conn, &elapsed).unwrap();
        insert_reminder(&conn, &removed).unwrap();
        for t in &current_times {
            insert_dose_time(&conn, t).unwrap();
        }
        soft_delete_reminder(&conn, &removed.id).unwrap();

        let live = list_live_schedules(&conn, date(2024, 1, 15)).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].reminder.id, current.id);
    }

    #[test]
    fn replace_times_swaps_full_set() {
        let conn = open_memory_database().unwrap();
        let med = sample_medication(Uuid::new_v4(), 30.0, 5.0);
        insert_medication(&conn, &med).unwrap();

        let (reminder, times) = sample_reminder(
            &med,
            date(2024, 1, 1),
            date(2024, 1, 3),
            &[(Daypart::Morning, time(8, 0), 1.0)],
        );
        insert_reminder(&conn, &reminder).unwrap();
        for t in &times {
            insert_dose_time(&conn, t).unwrap();
        }

        let replacement = vec![
            DoseTime {
                id: Uuid::new_v4(),
                reminder_id: reminder.id,
                daypart: Daypart::Noon,
                time_of_day: time(12, 0),
                dose_quantity: 1.0,
            },
            DoseTime {
                id: Uuid::new_v4(),
                reminder_id: reminder.id,
                daypart: Daypart::Night,
                time_of_day: time(22, 0),
                dose_quantity: 1.0,
            },
        ];
        replace_dose_times(&conn, &reminder.id, &replacement).unwrap();

        let loaded = get_dose_times(&conn, &reminder.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].daypart, Daypart::Noon);
        assert_eq!(loaded[1].daypart, Daypart::Night);
    }
}
