//! Inventory ledger — remaining quantity per medication.
//!
//! Decrements clamp at zero through a single atomic SQL update, so the
//! `0 ≤ remaining ≤ total` invariant holds under concurrent sessions;
//! SQLite serializes the writes. Inventory truth is decoupled from
//! adherence truth: a shortfall is reported, never used to block an
//! adherence transition.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::repository::alert::insert_alert;
use crate::db::repository::medication::{get_live_medication, list_medications};
use crate::error::EngineError;
use crate::models::enums::AlertKind;
use crate::models::{EngineAlert, Medication};

/// What a decrement did to the ledger.
#[derive(Debug, Clone)]
pub struct DecrementReport {
    pub requested: f64,
    /// Stock available before the decrement.
    pub available: f64,
    pub new_remaining: f64,
    /// Portion of the request the stock could not cover.
    pub shortfall: f64,
    /// True when this decrement moved the medication into low stock.
    pub entered_low_stock: bool,
}

impl DecrementReport {
    pub fn is_insufficient(&self) -> bool {
        self.shortfall > 0.0
    }
}

/// Take `quantity` units out of stock, clamped at zero. Emits a
/// `low_stock` alert when the decrement crosses the threshold.
pub fn decrement(
    conn: &Connection,
    medication_id: &Uuid,
    quantity: f64,
    observed_at: chrono::NaiveDateTime,
) -> Result<DecrementReport, EngineError> {
    if quantity <= 0.0 {
        return Err(EngineError::Validation(
            "decrement quantity must be positive".into(),
        ));
    }
    let before = require_medication(conn, medication_id)?;

    // Clamp inside SQL: the subtraction reads the row under SQLite's
    // write lock, so a concurrent restock is never lost.
    conn.execute(
        "UPDATE medications
         SET remaining_quantity = MAX(0, remaining_quantity - ?1)
         WHERE id = ?2 AND deleted = 0",
        params![quantity, medication_id.to_string()],
    )?;

    let after = require_medication(conn, medication_id)?;
    let shortfall = (quantity - before.remaining_quantity).max(0.0);
    let entered_low_stock = !before.is_low_stock() && after.is_low_stock();

    if entered_low_stock {
        insert_alert(
            conn,
            &EngineAlert {
                id: Uuid::new_v4(),
                patient_id: after.patient_id,
                medication_id: after.id,
                kind: AlertKind::LowStock,
                message: format!(
                    "{} is running low: {} {} left",
                    after.name, after.remaining_quantity, after.dose_form
                ),
                created_at: observed_at,
                delivered: false,
            },
        )?;
        tracing::info!(
            medication_id = %after.id,
            remaining = after.remaining_quantity,
            threshold = after.low_stock_threshold,
            "Medication entered low stock"
        );
    }

    Ok(DecrementReport {
        requested: quantity,
        available: before.remaining_quantity,
        new_remaining: after.remaining_quantity,
        shortfall,
        entered_low_stock,
    })
}

/// Add stock: raises the high-water mark and the remaining quantity
/// together, preserving `remaining ≤ total`.
pub fn restock(
    conn: &Connection,
    medication_id: &Uuid,
    added_quantity: f64,
) -> Result<Medication, EngineError> {
    if added_quantity <= 0.0 {
        return Err(EngineError::Validation(
            "restock quantity must be positive".into(),
        ));
    }
    let changed = conn.execute(
        "UPDATE medications
         SET total_quantity = total_quantity + ?1,
             remaining_quantity = remaining_quantity + ?1
         WHERE id = ?2 AND deleted = 0",
        params![added_quantity, medication_id.to_string()],
    )?;
    if changed == 0 {
        return Err(not_found(medication_id));
    }
    let med = require_medication(conn, medication_id)?;
    tracing::info!(medication_id = %med.id, added = added_quantity, "Restocked medication");
    Ok(med)
}

pub fn set_threshold(
    conn: &Connection,
    medication_id: &Uuid,
    threshold: f64,
) -> Result<Medication, EngineError> {
    if threshold < 0.0 {
        return Err(EngineError::Validation(
            "low-stock threshold cannot be negative".into(),
        ));
    }
    let changed = conn.execute(
        "UPDATE medications SET low_stock_threshold = ?1 WHERE id = ?2 AND deleted = 0",
        params![threshold, medication_id.to_string()],
    )?;
    if changed == 0 {
        return Err(not_found(medication_id));
    }
    require_medication(conn, medication_id)
}

/// Medications at or below their threshold. The predicate is computed
/// on read, never stored, so it cannot go stale.
pub fn low_stock_medications(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<Medication>, EngineError> {
    let meds = list_medications(conn, patient_id)?;
    Ok(meds.into_iter().filter(|m| m.is_low_stock()).collect())
}

fn require_medication(
    conn: &Connection,
    medication_id: &Uuid,
) -> Result<Medication, EngineError> {
    get_live_medication(conn, medication_id)?.ok_or_else(|| not_found(medication_id))
}

fn not_found(medication_id: &Uuid) -> EngineError {
    EngineError::NotFound {
        entity: "medication",
        id: medication_id.to_string(),
    }
}
