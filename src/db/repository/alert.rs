use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::AlertKind;
use crate::models::EngineAlert;

use super::dose_event::{format_datetime, parse_datetime};
use super::medication::parse_uuid;

pub fn insert_alert(conn: &Connection, alert: &EngineAlert) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO engine_alerts (id, patient_id, medication_id, kind, message,
         created_at, delivered)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            alert.id.to_string(),
            alert.patient_id.to_string(),
            alert.medication_id.to_string(),
            alert.kind.as_str(),
            alert.message,
            format_datetime(alert.created_at),
            alert.delivered as i32,
        ],
    )?;
    Ok(())
}

/// Undelivered alerts for a patient, oldest first — the feed the
/// external push collaborator polls.
pub fn pending_alerts(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<EngineAlert>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, medication_id, kind, message, created_at, delivered
         FROM engine_alerts
         WHERE patient_id = ?1 AND delivered = 0
         ORDER BY created_at ASC",
    )?;

    let rows = stmt.query_map(params![patient_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, i32>(6)?,
        ))
    })?;

    let mut alerts = Vec::new();
    for row in rows {
        let (id, patient, medication, kind, message, created_at, delivered) = row?;
        alerts.push(EngineAlert {
            id: parse_uuid(&id)?,
            patient_id: parse_uuid(&patient)?,
            medication_id: parse_uuid(&medication)?,
            kind: AlertKind::from_str(&kind)?,
            message,
            created_at: parse_datetime(&created_at)?,
            delivered: delivered != 0,
        });
    }
    Ok(alerts)
}

/// Acknowledge delivery of specific alerts.
pub fn mark_alerts_delivered(
    conn: &Connection,
    alert_ids: &[Uuid],
) -> Result<usize, DatabaseError> {
    let mut updated = 0;
    for id in alert_ids {
        updated += conn.execute(
            "UPDATE engine_alerts SET delivered = 1 WHERE id = ?1 AND delivered = 0",
            params![id.to_string()],
        )?;
    }
    Ok(updated)
}
