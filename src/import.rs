//! Bulk import from the external OCR/AI extraction collaborator.
//!
//! Each extracted record is validated and created independently. A bad
//! record produces a failure entry in the report; it never fails the
//! batch.

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::EnginePolicy;
use crate::db::repository::medication::insert_medication;
use crate::db::repository::reminder::{insert_dose_time, insert_reminder};
use crate::error::EngineError;
use crate::models::enums::{CreatorRole, Daypart, ReminderMode};
use crate::models::{DoseTime, Medication, Reminder, ReminderSchedule};
use crate::scheduler;

/// One record as produced by the extraction collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedMedication {
    pub name: String,
    pub dose_form: String,
    pub quantity: f64,
    pub note: Option<String>,
    #[serde(default)]
    pub suggested_times: Vec<SuggestedTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestedTime {
    pub daypart: Daypart,
    pub time_of_day: chrono::NaiveTime,
    pub dose_quantity: f64,
}

/// What a successfully imported record produced.
#[derive(Debug, Clone)]
pub struct ImportedRecord {
    pub medication_id: Uuid,
    /// Present when the record carried suggested times.
    pub reminder_id: Option<Uuid>,
    pub events_created: u32,
}

/// Per-record verdict, in input order.
#[derive(Debug)]
pub struct RecordOutcome {
    pub index: usize,
    pub name: String,
    pub result: Result<ImportedRecord, EngineError>,
}

/// Import a batch of extracted records for a patient. Records with
/// suggested times get a reminder spanning the default course length,
/// compiled immediately.
pub fn import_extracted(
    conn: &Connection,
    patient_id: &Uuid,
    created_by: &Uuid,
    creator_role: CreatorRole,
    records: Vec<ExtractedMedication>,
    now: NaiveDateTime,
    policy: &EnginePolicy,
) -> Result<Vec<RecordOutcome>, EngineError> {
    let mut outcomes = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let name = record.name.trim().to_string();
        let result = import_record(conn, patient_id, created_by, creator_role, record, now, policy);
        if let Err(err) = &result {
            tracing::warn!(index, name = %name, error = %err, "Import record rejected");
        }
        outcomes.push(RecordOutcome { index, name, result });
    }
    let imported = outcomes.iter().filter(|o| o.result.is_ok()).count();
    tracing::info!(
        patient_id = %patient_id,
        imported,
        rejected = outcomes.len() - imported,
        "Bulk import finished"
    );
    Ok(outcomes)
}

fn import_record(
    conn: &Connection,
    patient_id: &Uuid,
    created_by: &Uuid,
    creator_role: CreatorRole,
    record: ExtractedMedication,
    now: NaiveDateTime,
    policy: &EnginePolicy,
) -> Result<ImportedRecord, EngineError> {
    validate_record(&record)?;

    let medication = Medication {
        id: Uuid::new_v4(),
        patient_id: *patient_id,
        name: record.name.trim().to_string(),
        dose_form: record.dose_form.trim().to_string(),
        total_quantity: record.quantity,
        remaining_quantity: record.quantity,
        low_stock_threshold: 0.0,
        note: record.note,
        created_by: *created_by,
        creator_role,
        created_at: now,
        deleted: false,
    };
    insert_medication(conn, &medication)?;

    if record.suggested_times.is_empty() {
        return Ok(ImportedRecord {
            medication_id: medication.id,
            reminder_id: None,
            events_created: 0,
        });
    }

    let today = now.date();
    let reminder = Reminder {
        id: Uuid::new_v4(),
        medication_id: medication.id,
        start_date: today,
        end_date: today + Duration::days(policy.default_course_days),
        mode: ReminderMode::Silent,
        voice_profile: None,
        note: None,
        created_by: *created_by,
        deleted: false,
    };
    insert_reminder(conn, &reminder)?;

    let times: Vec<DoseTime> = record
        .suggested_times
        .iter()
        .map(|t| DoseTime {
            id: Uuid::new_v4(),
            reminder_id: reminder.id,
            daypart: t.daypart,
            time_of_day: t.time_of_day,
            dose_quantity: t.dose_quantity,
        })
        .collect();
    for time in &times {
        insert_dose_time(conn, time)?;
    }

    let schedule = ReminderSchedule {
        reminder: reminder.clone(),
        times,
    };
    let events_created = scheduler::compile_schedule(conn, &schedule, today, policy)?;

    Ok(ImportedRecord {
        medication_id: medication.id,
        reminder_id: Some(reminder.id),
        events_created,
    })
}

fn validate_record(record: &ExtractedMedication) -> Result<(), EngineError> {
    if record.name.trim().is_empty() {
        return Err(EngineError::Validation("medication name is required".into()));
    }
    if record.dose_form.trim().is_empty() {
        return Err(EngineError::Validation("dose form is required".into()));
    }
    if record.quantity <= 0.0 {
        return Err(EngineError::Validation(
            "extracted quantity must be positive".into(),
        ));
    }
    let mut seen = Vec::new();
    for time in &record.suggested_times {
        if time.dose_quantity <= 0.0 {
            return Err(EngineError::Validation(
                "dose quantity per time must be positive".into(),
            ));
        }
        if seen.contains(&time.daypart) {
            return Err(EngineError::Validation(format!(
                "duplicate daypart {}",
                time.daypart.as_str()
            )));
        }
        seen.push(time.daypart);
    }
    Ok(())
}
