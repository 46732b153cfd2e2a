//! Dose-event state machine and adherence classifier.
//!
//! Transitions: pending → on_time | late | missed | skipped | snoozed,
//! snoozed → on_time | late | missed | pending. Terminal states never
//! change again. Every write goes through the version gate; a losing
//! writer reloads and either recognizes its own intent (idempotent
//! duplicate) or retries once before reporting a conflict.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::EnginePolicy;
use crate::db::repository::alert::insert_alert;
use crate::db::repository::dose_event::{
    apply_transition, get_dose_event, nonterminal_elapsed, snooze_expired, TransitionUpdate,
};
use crate::error::EngineError;
use crate::inventory;
use crate::models::enums::{AlertKind, DoseStatus};
use crate::models::{DoseActionOutcome, DoseEvent, EngineAlert, StockWarning};

/// On-time or late, relative to the scheduled moment and the grace
/// window. Taking early is on time.
pub fn classify(
    scheduled_at: NaiveDateTime,
    taken_at: NaiveDateTime,
    policy: &EnginePolicy,
) -> DoseStatus {
    if taken_at <= scheduled_at + policy.grace_window() {
        DoseStatus::OnTime
    } else {
        DoseStatus::Late
    }
}

/// Record that a dose was taken. On success the inventory is
/// decremented exactly once; a shortfall is recorded on the event and
/// returned as a warning, never as a rejection.
pub fn mark_taken(
    conn: &Connection,
    event_id: &Uuid,
    taken_at: NaiveDateTime,
    policy: &EnginePolicy,
) -> Result<DoseActionOutcome, EngineError> {
    let mut event = require_event(conn, event_id)?;

    for attempt in 0..2 {
        if event.status.is_terminal() {
            return resolve_terminal_take(event, taken_at);
        }

        let status = classify(event.scheduled_at(), taken_at, policy);
        let update = TransitionUpdate {
            status,
            taken_at: Some(taken_at),
            snooze_until: None,
            snooze_count: event.snooze_count,
            stock_shortfall: 0.0,
        };
        if apply_transition(conn, event_id, event.version, &update)? {
            return settle_inventory(conn, event_id, &event, taken_at);
        }

        // Lost the gate: reload and decide on the fresh row.
        event = require_event(conn, event_id)?;
        if attempt == 1 && !event.status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "dose event {event_id} changed concurrently"
            )));
        }
    }

    resolve_terminal_take(event, taken_at)
}

/// A loser whose intent already happened returns the stored success.
fn resolve_terminal_take(
    event: DoseEvent,
    taken_at: NaiveDateTime,
) -> Result<DoseActionOutcome, EngineError> {
    if event.status.counts_as_taken() && event.taken_at == Some(taken_at) {
        return Ok(DoseActionOutcome {
            event,
            stock_warning: None,
        });
    }
    Err(EngineError::InvalidTransition {
        from: event.status,
        requested: "taken",
    })
}

/// Winner-only inventory decrement, then the shortfall (if any) is
/// written back onto the event through a second gated update.
fn settle_inventory(
    conn: &Connection,
    event_id: &Uuid,
    event: &DoseEvent,
    taken_at: NaiveDateTime,
) -> Result<DoseActionOutcome, EngineError> {
    let report = inventory::decrement(conn, &event.medication_id, event.dose_quantity, taken_at)?;

    let mut updated = require_event(conn, event_id)?;
    if report.is_insufficient() {
        let update = TransitionUpdate {
            status: updated.status,
            taken_at: updated.taken_at,
            snooze_until: updated.snooze_until,
            snooze_count: updated.snooze_count,
            stock_shortfall: report.shortfall,
        };
        apply_transition(conn, event_id, updated.version, &update)?;
        updated = require_event(conn, event_id)?;
        tracing::warn!(
            event_id = %event_id,
            medication_id = %event.medication_id,
            shortfall = report.shortfall,
            "Dose taken with insufficient stock"
        );
    }

    let stock_warning = report.is_insufficient().then(|| StockWarning {
        medication_id: event.medication_id,
        requested: report.requested,
        available: report.available,
    });
    Ok(DoseActionOutcome {
        event: updated,
        stock_warning,
    })
}

/// Record that a dose was deliberately not taken. No inventory change.
pub fn mark_skipped(
    conn: &Connection,
    event_id: &Uuid,
) -> Result<DoseActionOutcome, EngineError> {
    let mut event = require_event(conn, event_id)?;

    for attempt in 0..2 {
        if event.status.is_terminal() {
            break;
        }
        let update = TransitionUpdate {
            status: DoseStatus::Skipped,
            taken_at: None,
            snooze_until: None,
            snooze_count: event.snooze_count,
            stock_shortfall: 0.0,
        };
        if apply_transition(conn, event_id, event.version, &update)? {
            let event = require_event(conn, event_id)?;
            return Ok(DoseActionOutcome {
                event,
                stock_warning: None,
            });
        }
        event = require_event(conn, event_id)?;
        if attempt == 1 && !event.status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "dose event {event_id} changed concurrently"
            )));
        }
    }

    if event.status == DoseStatus::Skipped {
        return Ok(DoseActionOutcome {
            event,
            stock_warning: None,
        });
    }
    Err(EngineError::InvalidTransition {
        from: event.status,
        requested: "skipped",
    })
}

/// Defer a pending or snoozed dose by the policy interval. Each dose
/// carries a snooze budget; exhausting it is a hard rejection.
pub fn snooze(
    conn: &Connection,
    event_id: &Uuid,
    now: NaiveDateTime,
    policy: &EnginePolicy,
) -> Result<DoseEvent, EngineError> {
    let mut event = require_event(conn, event_id)?;

    for attempt in 0..2 {
        if event.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: event.status,
                requested: "snoozed",
            });
        }
        if event.snooze_count >= policy.max_snoozes {
            return Err(EngineError::SnoozeLimitExceeded {
                max: policy.max_snoozes,
            });
        }

        let update = TransitionUpdate {
            status: DoseStatus::Snoozed,
            taken_at: None,
            snooze_until: Some(now + policy.snooze_interval()),
            snooze_count: event.snooze_count + 1,
            stock_shortfall: event.stock_shortfall,
        };
        if apply_transition(conn, event_id, event.version, &update)? {
            return require_event(conn, event_id);
        }
        event = require_event(conn, event_id)?;
        if attempt == 1 {
            return Err(EngineError::Conflict(format!(
                "dose event {event_id} changed concurrently"
            )));
        }
    }

    Err(EngineError::Conflict(format!(
        "dose event {event_id} changed concurrently"
    )))
}

/// Wake expired snoozes: back to pending while the snooze budget has
/// room, otherwise straight to missed. Returns how many events moved.
pub fn reevaluate_snoozed(
    conn: &Connection,
    now: NaiveDateTime,
    policy: &EnginePolicy,
) -> Result<u32, EngineError> {
    let mut moved = 0;
    for event in snooze_expired(conn, now)? {
        let status = if event.snooze_count < policy.max_snoozes {
            DoseStatus::Pending
        } else {
            DoseStatus::Missed
        };
        let update = TransitionUpdate {
            status,
            taken_at: None,
            snooze_until: None,
            snooze_count: event.snooze_count,
            stock_shortfall: event.stock_shortfall,
        };
        // A concurrent patient action beats the wake-up; skip quietly.
        if apply_transition(conn, &event.id, event.version, &update)? {
            moved += 1;
        }
    }
    if moved > 0 {
        tracing::debug!(moved, "Re-evaluated expired snoozes");
    }
    Ok(moved)
}

/// End-of-day finalization: every non-terminal event whose scheduled
/// date fully elapsed becomes missed, with a `dose_missed` alert.
/// Shardable by patient; shards never contend.
pub fn finalize_elapsed(
    conn: &Connection,
    patient_id: Option<&Uuid>,
    today: NaiveDate,
) -> Result<u32, EngineError> {
    let mut finalized = 0;
    for event in nonterminal_elapsed(conn, patient_id, today)? {
        let update = TransitionUpdate {
            status: DoseStatus::Missed,
            taken_at: None,
            snooze_until: None,
            snooze_count: event.snooze_count,
            stock_shortfall: event.stock_shortfall,
        };
        if !apply_transition(conn, &event.id, event.version, &update)? {
            continue;
        }
        insert_alert(
            conn,
            &EngineAlert {
                id: Uuid::new_v4(),
                patient_id: event.patient_id,
                medication_id: event.medication_id,
                kind: AlertKind::DoseMissed,
                message: format!(
                    "Dose scheduled for {} {} was missed",
                    event.scheduled_date,
                    event.scheduled_time.format("%H:%M")
                ),
                created_at: today.and_hms_opt(0, 0, 0).unwrap_or_default(),
                delivered: false,
            },
        )?;
        finalized += 1;
    }
    if finalized > 0 {
        tracing::info!(finalized, "Finalized elapsed dose events as missed");
    }
    Ok(finalized)
}

fn require_event(conn: &Connection, event_id: &Uuid) -> Result<DoseEvent, EngineError> {
    get_dose_event(conn, event_id)?.ok_or(EngineError::NotFound {
        entity: "dose event",
        id: event_id.to_string(),
    })
}
