//! Engine façade.
//!
//! Every externally reachable operation goes through here and runs the
//! same gauntlet: entitlement check, then authorization, then the
//! mutation or query. Components below this layer trust their inputs.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use crate::adherence;
use crate::authorization::{require_access, AccessLevel};
use crate::config::EnginePolicy;
use crate::db::repository::alert::{mark_alerts_delivered, pending_alerts};
use crate::db::repository::care_grant::{insert_care_grant, revoke_care_grants, CareGrantRow};
use crate::db::repository::dose_event::{delete_future_unacted, get_dose_event};
use crate::db::repository::medication::{
    get_live_medication, insert_medication, list_medications, soft_delete_medication,
    update_medication_fields,
};
use crate::db::repository::reminder::{
    get_schedule, insert_dose_time, insert_reminder, list_reminders_for_medication,
    replace_dose_times, soft_delete_reminder, update_reminder_fields,
};
use crate::entitlement::{EntitlementProvider, Feature, OpenAccess};
use crate::error::EngineError;
use crate::import::{self, ExtractedMedication, RecordOutcome};
use crate::inventory;
use crate::models::enums::{CreatorRole, ReminderMode};
use crate::models::{
    DoseActionOutcome, DoseEvent, DoseTime, EngineAlert, FullOverview, Medication,
    MedicationUpdate, NewMedication, NewReminder, Reminder, ReminderSchedule, ReminderUpdate,
    WeeklyOverview,
};
use crate::overview;
use crate::scheduler;

/// Who is asking, and whose data they are asking about.
#[derive(Debug, Clone, Copy)]
pub struct ActorContext {
    pub actor_id: Uuid,
    pub patient_id: Uuid,
}

impl ActorContext {
    /// A patient operating on their own data.
    pub fn own(patient_id: Uuid) -> Self {
        Self {
            actor_id: patient_id,
            patient_id,
        }
    }

    pub fn on_behalf(actor_id: Uuid, patient_id: Uuid) -> Self {
        Self {
            actor_id,
            patient_id,
        }
    }
}

/// A patient-submitted action on a due dose event.
#[derive(Debug, Clone, Copy)]
pub enum DoseAction {
    Take,
    Skip,
    Snooze,
}

/// Result of creating or editing a reminder: the stored schedule plus
/// how many dose events were generated for it.
#[derive(Debug)]
pub struct ReminderChange {
    pub schedule: ReminderSchedule,
    pub events_created: u32,
}

pub struct Engine<E: EntitlementProvider = OpenAccess> {
    policy: EnginePolicy,
    entitlements: E,
}

impl Engine<OpenAccess> {
    /// Default policy, no feature gating.
    pub fn with_defaults() -> Self {
        Self::new(EnginePolicy::default(), OpenAccess)
    }
}

impl<E: EntitlementProvider> Engine<E> {
    pub fn new(policy: EnginePolicy, entitlements: E) -> Self {
        Self {
            policy,
            entitlements,
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    fn require_feature(&self, actor_id: &Uuid, feature: Feature) -> Result<(), EngineError> {
        if self.entitlements.allows(actor_id, feature) {
            return Ok(());
        }
        Err(EngineError::SubscriptionRequired { feature })
    }

    // ── Medications ──────────────────────────────────────

    pub fn create_medication(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        input: NewMedication,
        now: NaiveDateTime,
    ) -> Result<Medication, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        validate_new_medication(&input)?;

        let creator_role = if ctx.actor_id == ctx.patient_id {
            CreatorRole::Patient
        } else {
            CreatorRole::Relative
        };
        let medication = Medication {
            id: Uuid::new_v4(),
            patient_id: ctx.patient_id,
            name: input.name.trim().to_string(),
            dose_form: input.dose_form.trim().to_string(),
            total_quantity: input.total_quantity,
            remaining_quantity: input.total_quantity,
            low_stock_threshold: input.low_stock_threshold,
            note: input.note,
            created_by: ctx.actor_id,
            creator_role,
            created_at: now,
            deleted: false,
        };
        insert_medication(conn, &medication)?;
        tracing::info!(medication_id = %medication.id, patient_id = %ctx.patient_id, "Created medication");
        Ok(medication)
    }

    pub fn get_medication(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        medication_id: &Uuid,
    ) -> Result<Medication, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, false)?;
        self.owned_medication(conn, ctx, medication_id)
    }

    pub fn list_medications(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
    ) -> Result<Vec<Medication>, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, false)?;
        Ok(list_medications(conn, &ctx.patient_id)?)
    }

    pub fn update_medication(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        medication_id: &Uuid,
        update: MedicationUpdate,
    ) -> Result<Medication, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        self.owned_medication(conn, ctx, medication_id)?;
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(EngineError::Validation("medication name cannot be empty".into()));
            }
        }
        update_medication_fields(conn, medication_id, &update)?;
        self.owned_medication(conn, ctx, medication_id)
    }

    /// Soft-delete a medication. Its reminders stop generating and
    /// their future not-yet-acted events disappear; history stays.
    pub fn delete_medication(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        medication_id: &Uuid,
        today: NaiveDate,
    ) -> Result<(), EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        self.owned_medication(conn, ctx, medication_id)?;

        for reminder in list_reminders_for_medication(conn, medication_id)? {
            delete_future_unacted(conn, &reminder.id, today)?;
            soft_delete_reminder(conn, &reminder.id)?;
        }
        soft_delete_medication(conn, medication_id)?;
        tracing::info!(medication_id = %medication_id, "Deleted medication");
        Ok(())
    }

    // ── Inventory ────────────────────────────────────────

    pub fn restock(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        medication_id: &Uuid,
        added_quantity: f64,
    ) -> Result<Medication, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        self.owned_medication(conn, ctx, medication_id)?;
        inventory::restock(conn, medication_id, added_quantity)
    }

    pub fn set_low_stock_threshold(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        medication_id: &Uuid,
        threshold: f64,
    ) -> Result<Medication, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        self.owned_medication(conn, ctx, medication_id)?;
        inventory::set_threshold(conn, medication_id, threshold)
    }

    pub fn low_stock_medications(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
    ) -> Result<Vec<Medication>, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, false)?;
        inventory::low_stock_medications(conn, &ctx.patient_id)
    }

    // ── Reminders ────────────────────────────────────────

    pub fn create_reminder(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        input: NewReminder,
        today: NaiveDate,
    ) -> Result<ReminderChange, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        if input.mode == ReminderMode::Voice {
            self.require_feature(&ctx.actor_id, Feature::VoiceReminders)?;
        }
        self.owned_medication(conn, ctx, &input.medication_id)?;
        validate_date_range(input.start_date, input.end_date)?;
        validate_times(&input.times)?;

        let reminder = Reminder {
            id: Uuid::new_v4(),
            medication_id: input.medication_id,
            start_date: input.start_date,
            end_date: input.end_date,
            mode: input.mode,
            voice_profile: input.voice_profile,
            note: input.note,
            created_by: ctx.actor_id,
            deleted: false,
        };
        insert_reminder(conn, &reminder)?;

        let times: Vec<DoseTime> = input
            .times
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

        let schedule = ReminderSchedule { reminder, times };
        let events_created = scheduler::compile_schedule(conn, &schedule, today, &self.policy)?;
        tracing::info!(reminder_id = %schedule.reminder.id, events_created, "Created reminder");
        Ok(ReminderChange {
            schedule,
            events_created,
        })
    }

    /// Edit a reminder. Future not-yet-acted events are dropped and
    /// regenerated from the new definition; acted history is untouched.
    pub fn update_reminder(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        reminder_id: &Uuid,
        update: ReminderUpdate,
        today: NaiveDate,
    ) -> Result<ReminderChange, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        if update.mode == ReminderMode::Voice {
            self.require_feature(&ctx.actor_id, Feature::VoiceReminders)?;
        }
        let existing = self.owned_reminder(conn, ctx, reminder_id)?;
        validate_date_range(update.start_date, update.end_date)?;
        validate_times(&update.times)?;

        delete_future_unacted(conn, reminder_id, today)?;

        let reminder = Reminder {
            start_date: update.start_date,
            end_date: update.end_date,
            mode: update.mode,
            voice_profile: update.voice_profile,
            note: update.note,
            ..existing
        };
        update_reminder_fields(conn, &reminder)?;

        let times: Vec<DoseTime> = update
            .times
            .iter()
            .map(|t| DoseTime {
                id: Uuid::new_v4(),
                reminder_id: reminder.id,
                daypart: t.daypart,
                time_of_day: t.time_of_day,
                dose_quantity: t.dose_quantity,
            })
            .collect();
        replace_dose_times(conn, reminder_id, &times)?;

        let schedule = ReminderSchedule { reminder, times };
        let events_created = scheduler::compile_schedule(conn, &schedule, today, &self.policy)?;
        tracing::info!(reminder_id = %reminder_id, events_created, "Updated reminder");
        Ok(ReminderChange {
            schedule,
            events_created,
        })
    }

    pub fn delete_reminder(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        reminder_id: &Uuid,
        today: NaiveDate,
    ) -> Result<(), EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        self.owned_reminder(conn, ctx, reminder_id)?;

        delete_future_unacted(conn, reminder_id, today)?;
        soft_delete_reminder(conn, reminder_id)?;
        tracing::info!(reminder_id = %reminder_id, "Deleted reminder");
        Ok(())
    }

    pub fn get_reminder_schedule(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        reminder_id: &Uuid,
    ) -> Result<ReminderSchedule, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, false)?;
        let reminder = self.owned_reminder(conn, ctx, reminder_id)?;
        get_schedule(conn, &reminder.id)?.ok_or(EngineError::NotFound {
            entity: "reminder",
            id: reminder_id.to_string(),
        })
    }

    // ── Dose actions ─────────────────────────────────────

    pub fn submit_dose_action(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        event_id: &Uuid,
        action: DoseAction,
        now: NaiveDateTime,
    ) -> Result<DoseActionOutcome, EngineError> {
        self.require_feature(&ctx.actor_id, Feature::AdherenceTracking)?;
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        self.owned_event(conn, ctx, event_id)?;

        match action {
            DoseAction::Take => adherence::mark_taken(conn, event_id, now, &self.policy),
            DoseAction::Skip => adherence::mark_skipped(conn, event_id),
            DoseAction::Snooze => {
                let event = adherence::snooze(conn, event_id, now, &self.policy)?;
                Ok(DoseActionOutcome {
                    event,
                    stock_warning: None,
                })
            }
        }
    }

    // ── Queries ──────────────────────────────────────────

    pub fn weekly_overview(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        week_start: NaiveDate,
    ) -> Result<WeeklyOverview, EngineError> {
        self.require_feature(&ctx.actor_id, Feature::AdherenceTracking)?;
        require_access(conn, &ctx.actor_id, &ctx.patient_id, false)?;
        overview::weekly_overview(conn, &ctx.patient_id, week_start)
    }

    pub fn full_overview(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
    ) -> Result<FullOverview, EngineError> {
        self.require_feature(&ctx.actor_id, Feature::AdherenceTracking)?;
        require_access(conn, &ctx.actor_id, &ctx.patient_id, false)?;
        overview::full_overview(conn, &ctx.patient_id, &self.policy)
    }

    /// What the notification dispatcher asks: "what is due now".
    pub fn due_dose_events(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        now: NaiveDateTime,
    ) -> Result<Vec<DoseEvent>, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, false)?;
        overview::due_dose_events(conn, &ctx.patient_id, now)
    }

    pub fn alert_feed(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
    ) -> Result<Vec<EngineAlert>, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, false)?;
        Ok(pending_alerts(conn, &ctx.patient_id)?)
    }

    pub fn acknowledge_alerts(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        alert_ids: &[Uuid],
    ) -> Result<usize, EngineError> {
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;
        Ok(mark_alerts_delivered(conn, alert_ids)?)
    }

    // ── Care grants ──────────────────────────────────────

    /// Only the patient themself can delegate access.
    pub fn grant_care_access(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        caregiver_id: &Uuid,
        level: AccessLevel,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        self.require_feature(&ctx.actor_id, Feature::CaregiverSharing)?;
        if ctx.actor_id != ctx.patient_id {
            return Err(EngineError::PermissionDenied(
                "only the patient can grant care access".into(),
            ));
        }
        if caregiver_id == &ctx.patient_id {
            return Err(EngineError::Validation(
                "cannot grant care access to yourself".into(),
            ));
        }
        insert_care_grant(
            conn,
            &CareGrantRow {
                id: Uuid::new_v4(),
                patient_id: ctx.patient_id,
                caregiver_id: *caregiver_id,
                access_level: level.as_str().to_string(),
                granted_at: now,
                revoked_at: None,
            },
        )?;
        tracing::info!(patient_id = %ctx.patient_id, caregiver_id = %caregiver_id, level = level.as_str(), "Granted care access");
        Ok(())
    }

    pub fn revoke_care_access(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        caregiver_id: &Uuid,
        now: NaiveDateTime,
    ) -> Result<usize, EngineError> {
        if ctx.actor_id != ctx.patient_id {
            return Err(EngineError::PermissionDenied(
                "only the patient can revoke care access".into(),
            ));
        }
        Ok(revoke_care_grants(conn, &ctx.patient_id, caregiver_id, now)?)
    }

    // ── Bulk import ──────────────────────────────────────

    pub fn import_extracted(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        records: Vec<ExtractedMedication>,
        now: NaiveDateTime,
    ) -> Result<Vec<RecordOutcome>, EngineError> {
        self.require_feature(&ctx.actor_id, Feature::BulkImport)?;
        require_access(conn, &ctx.actor_id, &ctx.patient_id, true)?;

        let creator_role = if ctx.actor_id == ctx.patient_id {
            CreatorRole::Patient
        } else {
            CreatorRole::Relative
        };
        import::import_extracted(
            conn,
            &ctx.patient_id,
            &ctx.actor_id,
            creator_role,
            records,
            now,
            &self.policy,
        )
    }

    // ── Maintenance ──────────────────────────────────────

    /// Extend every live reminder's dose-event horizon.
    pub fn extend_schedules(
        &self,
        conn: &Connection,
        today: NaiveDate,
    ) -> Result<u32, EngineError> {
        scheduler::extend_horizons(conn, today, &self.policy)
    }

    /// Finalization sweep: elapsed non-terminal events become missed.
    pub fn finalize_elapsed(
        &self,
        conn: &Connection,
        patient_id: Option<&Uuid>,
        today: NaiveDate,
    ) -> Result<u32, EngineError> {
        adherence::finalize_elapsed(conn, patient_id, today)
    }

    /// Wake expired snoozes.
    pub fn reevaluate_snoozed(
        &self,
        conn: &Connection,
        now: NaiveDateTime,
    ) -> Result<u32, EngineError> {
        adherence::reevaluate_snoozed(conn, now, &self.policy)
    }

    // ── Ownership checks ─────────────────────────────────

    fn owned_medication(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        medication_id: &Uuid,
    ) -> Result<Medication, EngineError> {
        get_live_medication(conn, medication_id)?
            .filter(|m| m.patient_id == ctx.patient_id)
            .ok_or(EngineError::NotFound {
                entity: "medication",
                id: medication_id.to_string(),
            })
    }

    fn owned_reminder(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        reminder_id: &Uuid,
    ) -> Result<Reminder, EngineError> {
        let reminder = get_schedule(conn, reminder_id)?
            .map(|s| s.reminder)
            .filter(|r| !r.deleted)
            .ok_or(EngineError::NotFound {
                entity: "reminder",
                id: reminder_id.to_string(),
            })?;
        // Ownership goes through the medication
        self.owned_medication(conn, ctx, &reminder.medication_id)?;
        Ok(reminder)
    }

    fn owned_event(
        &self,
        conn: &Connection,
        ctx: &ActorContext,
        event_id: &Uuid,
    ) -> Result<DoseEvent, EngineError> {
        get_dose_event(conn, event_id)?
            .filter(|e| e.patient_id == ctx.patient_id)
            .ok_or(EngineError::NotFound {
                entity: "dose event",
                id: event_id.to_string(),
            })
    }
}

fn validate_new_medication(input: &NewMedication) -> Result<(), EngineError> {
    if input.name.trim().is_empty() {
        return Err(EngineError::Validation("medication name is required".into()));
    }
    if input.dose_form.trim().is_empty() {
        return Err(EngineError::Validation("dose form is required".into()));
    }
    if input.total_quantity <= 0.0 {
        return Err(EngineError::Validation(
            "total quantity must be positive".into(),
        ));
    }
    if input.low_stock_threshold < 0.0 {
        return Err(EngineError::Validation(
            "low-stock threshold cannot be negative".into(),
        ));
    }
    Ok(())
}

fn validate_date_range(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if start > end {
        return Err(EngineError::Validation(
            "start date must not be after end date".into(),
        ));
    }
    Ok(())
}

fn validate_times(times: &[crate::models::NewDoseTime]) -> Result<(), EngineError> {
    if times.is_empty() {
        return Err(EngineError::Validation(
            "a reminder needs at least one time of day".into(),
        ));
    }
    let mut seen = Vec::new();
    for time in times {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::dose_event::count_events_for_reminder;
    use crate::db::sqlite::{open_database, open_memory_database};
    use crate::entitlement::DenyList;
    use crate::models::enums::{AlertKind, Daypart, DoseStatus};
    use crate::models::NewDoseTime;
    use crate::test_support::{date, datetime, time};

    fn new_medication(total: f64) -> NewMedication {
        NewMedication {
            name: "Metformin".into(),
            dose_form: "tablet".into(),
            total_quantity: total,
            low_stock_threshold: 5.0,
            note: None,
        }
    }

    fn new_reminder(medication_id: Uuid, start: chrono::NaiveDate, end: chrono::NaiveDate) -> NewReminder {
        NewReminder {
            medication_id,
            start_date: start,
            end_date: end,
            mode: ReminderMode::Silent,
            voice_profile: None,
            note: None,
            times: vec![
                NewDoseTime {
                    daypart: Daypart::Morning,
                    time_of_day: time(8, 0),
                    dose_quantity: 1.0,
                },
                NewDoseTime {
                    daypart: Daypart::Evening,
                    time_of_day: time(20, 0),
                    dose_quantity: 1.0,
                },
            ],
        }
    }

    #[test]
    fn medication_lifecycle_through_the_facade() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let ctx = ActorContext::own(Uuid::new_v4());

        let med = engine
            .create_medication(&conn, &ctx, new_medication(30.0), datetime(2024, 1, 1, 9, 0))
            .unwrap();
        assert_eq!(med.remaining_quantity, 30.0);
        assert_eq!(med.creator_role, CreatorRole::Patient);

        let update = MedicationUpdate {
            name: Some("Metformin 500mg".into()),
            dose_form: None,
            note: Some("with meals".into()),
        };
        let updated = engine.update_medication(&conn, &ctx, &med.id, update).unwrap();
        assert_eq!(updated.name, "Metformin 500mg");
        assert_eq!(updated.dose_form, "tablet");

        engine.delete_medication(&conn, &ctx, &med.id, date(2024, 1, 2)).unwrap();
        assert!(matches!(
            engine.get_medication(&conn, &ctx, &med.id).unwrap_err(),
            EngineError::NotFound { .. }
        ));
    }

    #[test]
    fn create_medication_validates_input() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let ctx = ActorContext::own(Uuid::new_v4());

        let mut input = new_medication(30.0);
        input.name = "   ".into();
        assert!(matches!(
            engine
                .create_medication(&conn, &ctx, input, datetime(2024, 1, 1, 9, 0))
                .unwrap_err(),
            EngineError::Validation(_)
        ));

        assert!(matches!(
            engine
                .create_medication(&conn, &ctx, new_medication(0.0), datetime(2024, 1, 1, 9, 0))
                .unwrap_err(),
            EngineError::Validation(_)
        ));
    }

    #[test]
    fn reminder_create_compiles_events() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let ctx = ActorContext::own(Uuid::new_v4());
        let med = engine
            .create_medication(&conn, &ctx, new_medication(60.0), datetime(2024, 1, 1, 9, 0))
            .unwrap();

        let change = engine
            .create_reminder(
                &conn,
                &ctx,
                new_reminder(med.id, date(2024, 1, 1), date(2024, 1, 3)),
                date(2024, 1, 1),
            )
            .unwrap();
        assert_eq!(change.events_created, 6);
        assert_eq!(change.schedule.times.len(), 2);
    }

    #[test]
    fn reminder_update_drops_future_events_and_recompiles() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let ctx = ActorContext::own(Uuid::new_v4());
        let med = engine
            .create_medication(&conn, &ctx, new_medication(60.0), datetime(2024, 1, 1, 9, 0))
            .unwrap();
        let change = engine
            .create_reminder(
                &conn,
                &ctx,
                new_reminder(med.id, date(2024, 1, 1), date(2024, 1, 5)),
                date(2024, 1, 1),
            )
            .unwrap();
        let reminder_id = change.schedule.reminder.id;

        // Take the Jan 1 morning dose so it becomes history
        let due = engine
            .due_dose_events(&conn, &ctx, datetime(2024, 1, 1, 8, 0))
            .unwrap();
        engine
            .submit_dose_action(&conn, &ctx, &due[0].id, DoseAction::Take, datetime(2024, 1, 1, 8, 5))
            .unwrap();

        // Switch to a single daily slot from Jan 3
        let update = ReminderUpdate {
            start_date: date(2024, 1, 3),
            end_date: date(2024, 1, 5),
            mode: ReminderMode::Silent,
            voice_profile: None,
            note: None,
            times: vec![NewDoseTime {
                daypart: Daypart::Noon,
                time_of_day: time(12, 0),
                dose_quantity: 1.0,
            }],
        };
        let changed = engine
            .update_reminder(&conn, &ctx, &reminder_id, update, date(2024, 1, 3))
            .unwrap();
        assert_eq!(changed.events_created, 3);

        // 1 taken + 3 still-pending past slots + 3 regenerated; the 6
        // unacted slots from Jan 3 onward were dropped
        assert_eq!(count_events_for_reminder(&conn, &reminder_id).unwrap(), 7);
    }

    #[test]
    fn deleting_medication_cascades_to_future_events() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let ctx = ActorContext::own(Uuid::new_v4());
        let med = engine
            .create_medication(&conn, &ctx, new_medication(60.0), datetime(2024, 1, 1, 9, 0))
            .unwrap();
        let change = engine
            .create_reminder(
                &conn,
                &ctx,
                new_reminder(med.id, date(2024, 1, 1), date(2024, 1, 5)),
                date(2024, 1, 1),
            )
            .unwrap();
        let reminder_id = change.schedule.reminder.id;

        let due = engine
            .due_dose_events(&conn, &ctx, datetime(2024, 1, 1, 8, 0))
            .unwrap();
        engine
            .submit_dose_action(&conn, &ctx, &due[0].id, DoseAction::Take, datetime(2024, 1, 1, 8, 5))
            .unwrap();

        engine.delete_medication(&conn, &ctx, &med.id, date(2024, 1, 1)).unwrap();

        // Only the acted event remains; nothing new compiles
        assert_eq!(count_events_for_reminder(&conn, &reminder_id).unwrap(), 1);
        assert_eq!(engine.extend_schedules(&conn, date(2024, 1, 2)).unwrap(), 0);
    }

    #[test]
    fn take_flow_decrements_and_surfaces_low_stock() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let ctx = ActorContext::own(Uuid::new_v4());
        let mut input = new_medication(6.0);
        input.low_stock_threshold = 5.0;
        let med = engine
            .create_medication(&conn, &ctx, input, datetime(2024, 1, 1, 7, 0))
            .unwrap();
        engine
            .create_reminder(
                &conn,
                &ctx,
                new_reminder(med.id, date(2024, 1, 1), date(2024, 1, 3)),
                date(2024, 1, 1),
            )
            .unwrap();

        let due = engine
            .due_dose_events(&conn, &ctx, datetime(2024, 1, 1, 8, 0))
            .unwrap();
        let outcome = engine
            .submit_dose_action(&conn, &ctx, &due[0].id, DoseAction::Take, datetime(2024, 1, 1, 8, 5))
            .unwrap();
        assert_eq!(outcome.event.status, DoseStatus::OnTime);

        // 6 → 5 crossed the threshold
        let low = engine.low_stock_medications(&conn, &ctx).unwrap();
        assert_eq!(low.len(), 1);
        let feed = engine.alert_feed(&conn, &ctx).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].kind, AlertKind::LowStock);

        // Acknowledge and the feed drains
        engine.acknowledge_alerts(&conn, &ctx, &[feed[0].id]).unwrap();
        assert!(engine.alert_feed(&conn, &ctx).unwrap().is_empty());
    }

    #[test]
    fn caregiver_access_levels_are_enforced() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let patient = Uuid::new_v4();
        let caregiver = Uuid::new_v4();
        let own = ActorContext::own(patient);
        let as_caregiver = ActorContext::on_behalf(caregiver, patient);

        engine
            .create_medication(&conn, &own, new_medication(30.0), datetime(2024, 1, 1, 9, 0))
            .unwrap();

        // No grant yet
        assert!(matches!(
            engine.list_medications(&conn, &as_caregiver).unwrap_err(),
            EngineError::PermissionDenied(_)
        ));

        engine
            .grant_care_access(&conn, &own, &caregiver, AccessLevel::ReadOnly, datetime(2024, 1, 1, 10, 0))
            .unwrap();
        assert_eq!(engine.list_medications(&conn, &as_caregiver).unwrap().len(), 1);

        // Read-only cannot mutate
        assert!(matches!(
            engine
                .create_medication(&conn, &as_caregiver, new_medication(10.0), datetime(2024, 1, 1, 11, 0))
                .unwrap_err(),
            EngineError::PermissionDenied(_)
        ));

        engine
            .revoke_care_access(&conn, &own, &caregiver, datetime(2024, 1, 2, 0, 0))
            .unwrap();
        assert!(engine.list_medications(&conn, &as_caregiver).is_err());
    }

    #[test]
    fn only_the_patient_can_grant_access() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let patient = Uuid::new_v4();
        let caregiver = Uuid::new_v4();
        let as_caregiver = ActorContext::on_behalf(caregiver, patient);

        let err = engine
            .grant_care_access(&conn, &as_caregiver, &caregiver, AccessLevel::Full, datetime(2024, 1, 1, 0, 0))
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }

    #[test]
    fn gated_features_are_rejected_with_structured_fault() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::new(
            EnginePolicy::default(),
            DenyList::new(vec![Feature::BulkImport, Feature::VoiceReminders]),
        );
        let ctx = ActorContext::own(Uuid::new_v4());

        let err = engine
            .import_extracted(&conn, &ctx, vec![], datetime(2024, 1, 1, 9, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::SubscriptionRequired { feature: Feature::BulkImport }
        ));
        assert_eq!(err.code(), "SUBSCRIPTION_REQUIRED");

        let med = engine
            .create_medication(&conn, &ctx, new_medication(30.0), datetime(2024, 1, 1, 9, 0))
            .unwrap();
        let mut reminder = new_reminder(med.id, date(2024, 1, 1), date(2024, 1, 3));
        reminder.mode = ReminderMode::Voice;
        assert!(matches!(
            engine.create_reminder(&conn, &ctx, reminder, date(2024, 1, 1)).unwrap_err(),
            EngineError::SubscriptionRequired { feature: Feature::VoiceReminders }
        ));
    }

    #[test]
    fn events_of_other_patients_are_invisible() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let alice = ActorContext::own(Uuid::new_v4());
        let bob = ActorContext::own(Uuid::new_v4());

        let med = engine
            .create_medication(&conn, &alice, new_medication(30.0), datetime(2024, 1, 1, 9, 0))
            .unwrap();
        engine
            .create_reminder(
                &conn,
                &alice,
                new_reminder(med.id, date(2024, 1, 1), date(2024, 1, 3)),
                date(2024, 1, 1),
            )
            .unwrap();
        let due = engine
            .due_dose_events(&conn, &alice, datetime(2024, 1, 1, 8, 0))
            .unwrap();

        let err = engine
            .submit_dose_action(&conn, &bob, &due[0].id, DoseAction::Take, datetime(2024, 1, 1, 8, 5))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "dose event", .. }));
    }

    #[test]
    fn concurrent_takes_decrement_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");
        let conn_a = open_database(&path).unwrap();
        let conn_b = open_database(&path).unwrap();
        let engine = Engine::with_defaults();
        let ctx = ActorContext::own(Uuid::new_v4());

        let med = engine
            .create_medication(&conn_a, &ctx, new_medication(30.0), datetime(2024, 1, 1, 7, 0))
            .unwrap();
        engine
            .create_reminder(
                &conn_a,
                &ctx,
                new_reminder(med.id, date(2024, 1, 1), date(2024, 1, 3)),
                date(2024, 1, 1),
            )
            .unwrap();
        let due = engine
            .due_dose_events(&conn_a, &ctx, datetime(2024, 1, 1, 8, 0))
            .unwrap();
        let event_id = due[0].id;
        let taken_at = datetime(2024, 1, 1, 8, 5);

        // Two sessions submit the same take
        let first = engine
            .submit_dose_action(&conn_a, &ctx, &event_id, DoseAction::Take, taken_at)
            .unwrap();
        let second = engine
            .submit_dose_action(&conn_b, &ctx, &event_id, DoseAction::Take, taken_at)
            .unwrap();
        assert_eq!(first.event.status, DoseStatus::OnTime);
        assert_eq!(second.event.status, DoseStatus::OnTime);

        // Exactly one decrement
        let meds = engine.list_medications(&conn_b, &ctx).unwrap();
        assert_eq!(meds[0].remaining_quantity, 29.0);
    }

    #[test]
    fn maintenance_pipeline_end_to_end() {
        let conn = open_memory_database().unwrap();
        let engine = Engine::with_defaults();
        let ctx = ActorContext::own(Uuid::new_v4());
        let med = engine
            .create_medication(&conn, &ctx, new_medication(60.0), datetime(2024, 1, 1, 7, 0))
            .unwrap();
        engine
            .create_reminder(
                &conn,
                &ctx,
                new_reminder(med.id, date(2024, 1, 1), date(2024, 1, 2)),
                date(2024, 1, 1),
            )
            .unwrap();

        // Snooze the first morning dose, let it expire
        let due = engine
            .due_dose_events(&conn, &ctx, datetime(2024, 1, 1, 8, 0))
            .unwrap();
        engine
            .submit_dose_action(&conn, &ctx, &due[0].id, DoseAction::Snooze, datetime(2024, 1, 1, 8, 0))
            .unwrap();
        assert_eq!(
            engine.reevaluate_snoozed(&conn, datetime(2024, 1, 1, 8, 30)).unwrap(),
            1
        );

        // Day rolls over with nothing taken: all 4 events go missed
        assert_eq!(engine.finalize_elapsed(&conn, None, date(2024, 1, 3)).unwrap(), 4);

        let overview = engine.full_overview(&conn, &ctx).unwrap();
        assert_eq!(overview.missed, 4);
        assert_eq!(overview.adherence_rate, 0);

        // One dose_missed alert per finalized event
        let feed = engine.alert_feed(&conn, &ctx).unwrap();
        assert_eq!(
            feed.iter().filter(|a| a.kind == AlertKind::DoseMissed).count(),
            4
        );
    }
}
