use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::CreatorRole;
use crate::models::{Medication, MedicationUpdate};

const MEDICATION_COLUMNS: &str =
    "id, patient_id, name, dose_form, total_quantity, remaining_quantity,
     low_stock_threshold, note, created_by, creator_role, created_at, deleted";

pub fn insert_medication(conn: &Connection, med: &Medication) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medications (id, patient_id, name, dose_form, total_quantity,
         remaining_quantity, low_stock_threshold, note, created_by, creator_role,
         created_at, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            med.id.to_string(),
            med.patient_id.to_string(),
            med.name,
            med.dose_form,
            med.total_quantity,
            med.remaining_quantity,
            med.low_stock_threshold,
            med.note,
            med.created_by.to_string(),
            med.creator_role.as_str(),
            med.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            med.deleted as i32,
        ],
    )?;
    Ok(())
}

/// Fetch one medication, deleted or not.
pub fn get_medication(
    conn: &Connection,
    med_id: &Uuid,
) -> Result<Option<Medication>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"),
        params![med_id.to_string()],
        medication_row,
    );
    match result {
        Ok(row) => Ok(Some(medication_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// Fetch one non-deleted medication.
pub fn get_live_medication(
    conn: &Connection,
    med_id: &Uuid,
) -> Result<Option<Medication>, DatabaseError> {
    Ok(get_medication(conn, med_id)?.filter(|m| !m.deleted))
}

pub fn list_medications(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<Medication>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications
         WHERE patient_id = ?1 AND deleted = 0
         ORDER BY name ASC"
    ))?;

    let rows = stmt.query_map(params![patient_id.to_string()], medication_row)?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row?)?);
    }
    Ok(meds)
}

pub fn update_medication_fields(
    conn: &Connection,
    med_id: &Uuid,
    update: &MedicationUpdate,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET
            name = COALESCE(?1, name),
            dose_form = COALESCE(?2, dose_form),
            note = COALESCE(?3, note)
         WHERE id = ?4 AND deleted = 0",
        params![update.name, update.dose_form, update.note, med_id.to_string()],
    )?;
    Ok(changed == 1)
}

pub fn soft_delete_medication(conn: &Connection, med_id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET deleted = 1 WHERE id = ?1 AND deleted = 0",
        params![med_id.to_string()],
    )?;
    Ok(changed == 1)
}

// Internal row type mirroring column order above
pub(crate) struct MedicationRow {
    id: String,
    patient_id: String,
    name: String,
    dose_form: String,
    total_quantity: f64,
    remaining_quantity: f64,
    low_stock_threshold: f64,
    note: Option<String>,
    created_by: String,
    creator_role: String,
    created_at: String,
    deleted: i32,
}

pub(crate) fn medication_row(row: &rusqlite::Row<'_>) -> Result<MedicationRow, rusqlite::Error> {
    Ok(MedicationRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        name: row.get(2)?,
        dose_form: row.get(3)?,
        total_quantity: row.get(4)?,
        remaining_quantity: row.get(5)?,
        low_stock_threshold: row.get(6)?,
        note: row.get(7)?,
        created_by: row.get(8)?,
        creator_role: row.get(9)?,
        created_at: row.get(10)?,
        deleted: row.get(11)?,
    })
}

pub(crate) fn medication_from_row(row: MedicationRow) -> Result<Medication, DatabaseError> {
    Ok(Medication {
        id: parse_uuid(&row.id)?,
        patient_id: parse_uuid(&row.patient_id)?,
        name: row.name,
        dose_form: row.dose_form,
        total_quantity: row.total_quantity,
        remaining_quantity: row.remaining_quantity,
        low_stock_threshold: row.low_stock_threshold,
        note: row.note,
        created_by: parse_uuid(&row.created_by)?,
        creator_role: CreatorRole::from_str(&row.creator_role)?,
        created_at: NaiveDateTime::parse_from_str(&row.created_at, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        deleted: row.deleted != 0,
    })
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}
