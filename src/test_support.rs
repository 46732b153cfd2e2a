//! Shared fixtures for unit tests.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository::medication::insert_medication;
use crate::db::repository::reminder::{insert_dose_time, insert_reminder};
use crate::models::enums::{CreatorRole, Daypart, DoseStatus, ReminderMode};
use crate::models::{DoseEvent, DoseTime, Medication, Reminder};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn datetime(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    date(year, month, day).and_time(time(hour, minute))
}

pub fn sample_medication(patient_id: Uuid, total: f64, threshold: f64) -> Medication {
    Medication {
        id: Uuid::new_v4(),
        patient_id,
        name: "Metformin".into(),
        dose_form: "tablet".into(),
        total_quantity: total,
        remaining_quantity: total,
        low_stock_threshold: threshold,
        note: None,
        created_by: patient_id,
        creator_role: CreatorRole::Patient,
        created_at: datetime(2024, 1, 1, 0, 0),
        deleted: false,
    }
}

pub fn sample_reminder(
    med: &Medication,
    start: NaiveDate,
    end: NaiveDate,
    slots: &[(Daypart, NaiveTime, f64)],
) -> (Reminder, Vec<DoseTime>) {
    let reminder = Reminder {
        id: Uuid::new_v4(),
        medication_id: med.id,
        start_date: start,
        end_date: end,
        mode: ReminderMode::Silent,
        voice_profile: None,
        note: None,
        created_by: med.patient_id,
        deleted: false,
    };
    let times = slots
        .iter()
        .map(|(daypart, time_of_day, dose_quantity)| DoseTime {
            id: Uuid::new_v4(),
            reminder_id: reminder.id,
            daypart: *daypart,
            time_of_day: *time_of_day,
            dose_quantity: *dose_quantity,
        })
        .collect();
    (reminder, times)
}

/// A medication with one reminder (08:00 and 20:00, one unit each)
/// already persisted, plus helpers to build ledger rows against it.
pub struct SeededSchedule {
    pub medication: Medication,
    pub reminder: Reminder,
    pub times: Vec<DoseTime>,
}

impl SeededSchedule {
    pub fn pending_event(&self, on: NaiveDate, at: NaiveTime) -> DoseEvent {
        DoseEvent {
            id: Uuid::new_v4(),
            patient_id: self.medication.patient_id,
            medication_id: self.medication.id,
            reminder_id: self.reminder.id,
            scheduled_date: on,
            scheduled_time: at,
            dose_quantity: 1.0,
            status: DoseStatus::Pending,
            taken_at: None,
            snooze_until: None,
            snooze_count: 0,
            stock_shortfall: 0.0,
            version: 1,
        }
    }
}

pub fn seeded_schedule(conn: &Connection, start: NaiveDate, end: NaiveDate) -> SeededSchedule {
    seeded_schedule_with_stock(conn, start, end, 30.0, 5.0)
}

pub fn seeded_schedule_with_stock(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    total: f64,
    threshold: f64,
) -> SeededSchedule {
    let medication = sample_medication(Uuid::new_v4(), total, threshold);
    insert_medication(conn, &medication).expect("insert medication");

    let (reminder, times) = sample_reminder(
        &medication,
        start,
        end,
        &[
            (Daypart::Morning, time(8, 0), 1.0),
            (Daypart::Evening, time(20, 0), 1.0),
        ],
    );
    insert_reminder(conn, &reminder).expect("insert reminder");
    for t in &times {
        insert_dose_time(conn, t).expect("insert dose time");
    }

    SeededSchedule {
        medication,
        reminder,
        times,
    }
}
