//! Aggregation over the dose-event ledger.
//!
//! Pure projections: every overview is recomputed from the ledger on
//! demand, so edits and late transitions are reflected immediately.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::EnginePolicy;
use crate::db::repository::dose_event::{due_events, events_between, recent_events};
use crate::db::repository::medication::list_medications;
use crate::error::EngineError;
use crate::models::enums::DoseStatus;
use crate::models::{
    DayAdherence, DayCounts, DoseEvent, FullOverview, MedicationWeekly, WeeklyOverview,
};

/// Seven calendar days from `week_start`, counted across all of the
/// patient's medications and split per medication.
pub fn weekly_overview(
    conn: &Connection,
    patient_id: &Uuid,
    week_start: NaiveDate,
) -> Result<WeeklyOverview, EngineError> {
    let week_end = week_start + Duration::days(6);
    let events = events_between(conn, patient_id, week_start, week_end)?;

    let days = count_by_day(week_start, &events, |_| true);

    let mut medications = Vec::new();
    for med in list_medications(conn, patient_id)? {
        let has_events = events.iter().any(|e| e.medication_id == med.id);
        if !has_events {
            continue;
        }
        medications.push(MedicationWeekly {
            medication_id: med.id,
            medication_name: med.name.clone(),
            days: count_by_day(week_start, &events, |e| e.medication_id == med.id),
        });
    }

    Ok(WeeklyOverview {
        week_start,
        days,
        medications,
    })
}

fn count_by_day<F>(week_start: NaiveDate, events: &[DoseEvent], include: F) -> Vec<DayAdherence>
where
    F: Fn(&DoseEvent) -> bool,
{
    (0..7)
        .map(|offset| {
            let date = week_start + Duration::days(offset);
            let mut counts = DayCounts::default();
            for event in events.iter().filter(|e| e.scheduled_date == date) {
                if !include(event) {
                    continue;
                }
                match event.status {
                    DoseStatus::OnTime => counts.on_time += 1,
                    DoseStatus::Late => counts.late += 1,
                    DoseStatus::Missed => counts.missed += 1,
                    DoseStatus::Skipped => counts.skipped += 1,
                    DoseStatus::Pending | DoseStatus::Snoozed => {}
                }
            }
            DayAdherence { date, counts }
        })
        .collect()
}

/// Lifetime totals and the adherence rate, plus the most recent events.
/// The rate's denominator is terminal events only — doses still pending
/// or snoozed have no verdict yet.
pub fn full_overview(
    conn: &Connection,
    patient_id: &Uuid,
    policy: &EnginePolicy,
) -> Result<FullOverview, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM dose_events
         WHERE patient_id = ?1
         GROUP BY status",
    )?;
    let rows = stmt.query_map(rusqlite::params![patient_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
    })?;

    let mut total_events = 0;
    let (mut on_time, mut late, mut missed, mut skipped) = (0, 0, 0, 0);
    for row in rows {
        let (status, count) = row?;
        total_events += count;
        match status.as_str() {
            "on_time" => on_time = count,
            "late" => late = count,
            "missed" => missed = count,
            "skipped" => skipped = count,
            _ => {}
        }
    }

    let terminal = on_time + late + missed + skipped;
    let adherence_rate = if terminal == 0 {
        0
    } else {
        ((f64::from(on_time + late) / f64::from(terminal)) * 100.0).round() as u32
    };

    Ok(FullOverview {
        total_events,
        on_time,
        late,
        missed,
        skipped,
        adherence_rate,
        recent_events: recent_events(conn, patient_id, policy.recent_events_limit)?,
    })
}

/// Events awaiting action right now: pending ones whose scheduled
/// moment has passed, and snoozed ones whose deferral has expired.
pub fn due_dose_events(
    conn: &Connection,
    patient_id: &Uuid,
    now: NaiveDateTime,
) -> Result<Vec<DoseEvent>, EngineError> {
    Ok(due_events(conn, patient_id, now)?)
}
