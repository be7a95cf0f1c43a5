//! The appointment flow orchestrator: one call per classified utterance.
//!
//! Dialogue state is a persisted [`AppointmentContext`]; the orchestrator
//! merges newly extracted slots into it, validates the proposal against
//! hours, conflicts and the roster, and either asks exactly one clarifying
//! question or drives the draft/confirm protocol to a terminal outcome.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use chrono_tz::Tz;
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::FlowError;
use crate::models::{
    Appointment, AppointmentContext, AppointmentStatus, Business, ClassifiedUtterance,
    ConversationRecord, DialogueMode, ErrorKind, FlowReply, IntentKind, RawSlots, Service,
    SlotKind,
};
use crate::services::calendar::EventInput;
use crate::services::scheduling::BookingCache;
use crate::services::staff::StaffDecision;
use crate::services::{clock, drafts, hours, scheduling, slots, staff};
use crate::state::CoreState;

/// Run one dialogue turn. Infrastructure failures come back as the
/// `error` reply variant; everything recoverable is a clarifying question.
pub async fn process_turn(
    state: &CoreState,
    business_id: &str,
    channel: &str,
    session_key: &str,
    utterance: &ClassifiedUtterance,
) -> FlowReply {
    match run_turn(state, business_id, channel, session_key, utterance).await {
        Ok(reply) => reply,
        Err(FlowError::UnknownBusiness(id)) => FlowReply::Error {
            kind: ErrorKind::UnknownBusiness,
            details: format!("unknown business: {id}"),
        },
        Err(FlowError::DraftNotFound(id)) => FlowReply::Error {
            kind: ErrorKind::DraftNotFound,
            details: format!("draft not found or already confirmed: {id}"),
        },
        Err(e) => {
            tracing::error!(business = business_id, session = session_key, error = %e, "turn failed");
            FlowReply::Error {
                kind: ErrorKind::Internal,
                details: "internal error".to_string(),
            }
        }
    }
}

async fn run_turn(
    state: &CoreState,
    business_id: &str,
    channel: &str,
    session_key: &str,
    utterance: &ClassifiedUtterance,
) -> Result<FlowReply, FlowError> {
    let now = state.clock.now_utc().naive_utc();

    let (business, mut record, services) = {
        let db = state.db.lock().unwrap();
        let business = queries::get_business(&db, business_id)?
            .ok_or_else(|| FlowError::UnknownBusiness(business_id.to_string()))?;
        let record = queries::ensure_conversation(
            &db,
            business_id,
            channel,
            session_key,
            &now,
            state.config.session_ttl_minutes,
        )?;
        let services = queries::list_active_services(&db, business_id)?;
        (business, record, services)
    };

    let tz = clock::business_tz(&business);
    let today = clock::today_in(tz, state.clock.as_ref());

    tracing::info!(
        business = business_id,
        session = session_key,
        intent = utterance.intent.as_str(),
        confidence = utterance.confidence as f64,
        mode = ?record.context.mode,
        "processing turn"
    );

    // A new actionable intent preempts whatever flow was in flight. The
    // customer's identity carries over; an abandoned draft does not.
    let mut ctx = record.context.clone();
    if let Some(new_mode) = mode_for(utterance.intent) {
        if ctx.mode != Some(new_mode) {
            let stale_draft = ctx.draft_id.take();
            ctx = AppointmentContext {
                mode: Some(new_mode),
                customer_name: ctx.customer_name,
                customer_phone: ctx.customer_phone,
                ..Default::default()
            };
            if let Some(draft_id) = stale_draft {
                let db = state.db.lock().unwrap();
                drafts::discard_draft(&db, &draft_id)?;
            }
        }
    }

    merge_slots(&mut ctx, &services, &utterance.slots, today);
    record.last_intent = Some(utterance.intent.as_str().to_string());

    let turn = Turn {
        state,
        business: &business,
        tz,
        now,
    };

    match utterance.intent {
        IntentKind::CreateAppointment => turn.booking(&mut record, ctx),
        IntentKind::AppointmentConfirm => turn.confirm(&mut record, ctx).await,
        IntentKind::CancelAppointment => turn.cancel(&mut record, ctx).await,
        IntentKind::RescheduleAppointment => turn.reschedule(&mut record, ctx).await,
        IntentKind::AppointmentInfo => turn.info(&mut record, ctx),
        IntentKind::Availability | IntentKind::StaffAvailability => {
            turn.availability(&mut record, ctx)
        }
        // Slot answers mid-flow arrive unclassified; route them to the
        // mode being collected. With no flow active the core is not the
        // owner of this utterance.
        IntentKind::Other => match ctx.mode {
            Some(DialogueMode::Booking) => turn.booking(&mut record, ctx),
            Some(DialogueMode::Cancel) => turn.cancel(&mut record, ctx).await,
            Some(DialogueMode::Reschedule) => turn.reschedule(&mut record, ctx).await,
            Some(DialogueMode::Info) => turn.info(&mut record, ctx),
            Some(DialogueMode::Availability) => turn.availability(&mut record, ctx),
            None => {
                let db = state.db.lock().unwrap();
                turn.persist(&db, &mut record, &ctx)?;
                Ok(FlowReply::Unhandled)
            }
        },
    }
}

fn mode_for(intent: IntentKind) -> Option<DialogueMode> {
    match intent {
        IntentKind::CreateAppointment => Some(DialogueMode::Booking),
        IntentKind::CancelAppointment => Some(DialogueMode::Cancel),
        IntentKind::RescheduleAppointment => Some(DialogueMode::Reschedule),
        IntentKind::AppointmentInfo => Some(DialogueMode::Info),
        IntentKind::Availability | IntentKind::StaffAvailability => {
            Some(DialogueMode::Availability)
        }
        IntentKind::AppointmentConfirm | IntentKind::Other => None,
    }
}

/// Every classifier field is untrusted: a slot only lands in the context
/// once the normalizer accepts it, and a failed parse never erases a value
/// collected on an earlier turn.
fn merge_slots(
    ctx: &mut AppointmentContext,
    services: &[Service],
    raw: &RawSlots,
    today: NaiveDate,
) {
    if let Some(value) = &raw.date {
        if let Some(date) = slots::resolve_date(value, today) {
            ctx.date = Some(date);
        }
    }
    if let Some(value) = &raw.time {
        if let Some(time) = slots::as_clock_time(value) {
            ctx.time = Some(time);
        }
    }
    if let Some(value) = &raw.service {
        if let Some(service) = slots::match_service(services, value) {
            ctx.service_id = Some(service.id.clone());
        }
    }
    if let Some(value) = &raw.staff {
        if let Some(name) = slots::as_text(value) {
            ctx.staff_name = Some(name);
        }
    }
    if let Some(value) = &raw.customer_name {
        if let Some(name) = slots::as_text(value) {
            ctx.customer_name = Some(name);
        }
    }
    if let Some(value) = &raw.customer_phone {
        if let Some(phone) = slots::as_text(value) {
            ctx.customer_phone = Some(phone);
        }
    }
    if let Some(value) = &raw.window_start {
        if let Some(time) = slots::as_clock_time(value) {
            ctx.window_start = Some(time);
        }
    }
    if let Some(value) = &raw.window_end {
        if let Some(time) = slots::as_clock_time(value) {
            ctx.window_end = Some(time);
        }
    }
}

struct Turn<'a> {
    state: &'a CoreState,
    business: &'a Business,
    tz: Tz,
    now: NaiveDateTime,
}

impl Turn<'_> {
    fn persist(
        &self,
        db: &Connection,
        record: &mut ConversationRecord,
        ctx: &AppointmentContext,
    ) -> Result<(), FlowError> {
        record.context = ctx.clone();
        record.updated_at = self.now;
        record.expires_at =
            self.now + Duration::minutes(self.state.config.session_ttl_minutes);
        queries::save_conversation(db, record)?;
        Ok(())
    }

    /// Persist the partial context and ask for exactly one missing slot.
    fn ask(
        &self,
        db: &Connection,
        record: &mut ConversationRecord,
        ctx: &AppointmentContext,
        missing: SlotKind,
        question: String,
        suggestions: Vec<String>,
    ) -> Result<FlowReply, FlowError> {
        self.persist(db, record, ctx)?;
        Ok(FlowReply::NeedInfo {
            missing,
            question,
            suggestions,
            draft_id: ctx.draft_id.clone(),
        })
    }

    fn clear(&self, db: &Connection, record: &ConversationRecord) -> Result<(), FlowError> {
        queries::clear_conversation(db, &record.business_id, &record.channel, &record.session_key)?;
        Ok(())
    }

    fn suggest(
        &self,
        db: &Connection,
        cache: &mut BookingCache,
        staff_id: Option<&str>,
        date: NaiveDate,
        duration_minutes: i32,
    ) -> Result<Vec<String>, FlowError> {
        let times = scheduling::find_slots(
            db,
            cache,
            self.business,
            staff_id,
            date,
            duration_minutes,
            self.state.config.max_suggestions,
            None,
            self.state.config.slot_step_minutes,
        )?;
        Ok(times.iter().map(|t| t.format("%H:%M").to_string()).collect())
    }

    // ── create_appointment ──

    fn booking(
        &self,
        record: &mut ConversationRecord,
        mut ctx: AppointmentContext,
    ) -> Result<FlowReply, FlowError> {
        let db = self.state.db.lock().unwrap();
        let mut cache = BookingCache::new();

        let Some(service_id) = ctx.service_id.clone() else {
            return self.ask(
                &db, record, &ctx,
                SlotKind::Service,
                "What service would you like to book?".to_string(),
                vec![],
            );
        };
        let Some(service) = queries::get_service(&db, &service_id)? else {
            // Stale reference, e.g. the service was deactivated mid-call.
            ctx.service_id = None;
            return self.ask(
                &db, record, &ctx,
                SlotKind::Service,
                "Which service would you like to book?".to_string(),
                vec![],
            );
        };

        let Some(date) = ctx.date else {
            return self.ask(
                &db, record, &ctx,
                SlotKind::Date,
                "What day works for you?".to_string(),
                vec![],
            );
        };

        let Some(window) = hours::hours_for(&db, self.business, date)? else {
            ctx.date = None;
            ctx.time = None;
            let open_hours = hours::human_hours(&db, self.business)?;
            let question = if open_hours.is_empty() {
                "We're closed that day. What other day works for you?".to_string()
            } else {
                format!("We're closed that day. We're open {open_hours}. What other day works for you?")
            };
            return self.ask(&db, record, &ctx, SlotKind::Date, question, vec![]);
        };

        let Some(time) = ctx.time else {
            return self.ask(
                &db, record, &ctx,
                SlotKind::Time,
                "What time would you like?".to_string(),
                vec![],
            );
        };

        let duration = service.duration_minutes.max(1);
        let start_minute = time.hour() * 60 + time.minute();
        if start_minute < window.open_minute
            || start_minute + duration as u32 > window.close_minute
        {
            ctx.time = None;
            let suggestions = self.suggest(&db, &mut cache, None, date, duration)?;
            let open_hours = hours::human_hours(&db, self.business)?;
            return self.ask(
                &db, record, &ctx,
                SlotKind::Time,
                with_suggestions(
                    &format!("That time is outside our business hours ({open_hours})."),
                    &suggestions,
                ),
                suggestions,
            );
        }

        let Some(start_at) = clock::local_to_utc(self.tz, date, time) else {
            ctx.time = None;
            return self.ask(
                &db, record, &ctx,
                SlotKind::Time,
                "That time doesn't exist on that date. What other time works?".to_string(),
                vec![],
            );
        };
        let end_at = start_at + Duration::minutes(duration as i64);

        let (staff_id, staff_label) = if self.business.staff_scheduling {
            match staff::resolve_staff(
                &db,
                &mut cache,
                self.business,
                &service,
                ctx.staff_name.as_deref(),
                &start_at,
                &end_at,
            )? {
                StaffDecision::Assigned(member) => {
                    (Some(member.id), Some(member.display_name))
                }
                StaffDecision::NotFound(name) => {
                    ctx.staff_name = None;
                    return self.ask(
                        &db, record, &ctx,
                        SlotKind::Staff,
                        format!("I couldn't find {name} on our team. Who would you like to book with?"),
                        vec![],
                    );
                }
                StaffDecision::Busy(member) => {
                    ctx.time = None;
                    let suggestions =
                        self.suggest(&db, &mut cache, Some(&member.id), date, duration)?;
                    return self.ask(
                        &db, record, &ctx,
                        SlotKind::Time,
                        with_suggestions(
                            &format!("{} isn't free at that time.", member.display_name),
                            &suggestions,
                        ),
                        suggestions,
                    );
                }
                StaffDecision::NoneFree => {
                    ctx.time = None;
                    let suggestions = self.suggest(&db, &mut cache, None, date, duration)?;
                    return self.ask(
                        &db, record, &ctx,
                        SlotKind::Time,
                        with_suggestions("Nobody is free at that time.", &suggestions),
                        suggestions,
                    );
                }
            }
        } else {
            if cache.overlaps(&db, &self.business.id, None, &start_at, &end_at, None)? {
                ctx.time = None;
                let suggestions = self.suggest(&db, &mut cache, None, date, duration)?;
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Time,
                    with_suggestions("Sorry, that time slot is already booked.", &suggestions),
                    suggestions,
                );
            }
            (None, None)
        };

        // The draft exists as soon as the window validates; the customer
        // name can arrive afterwards. A changed proposal replaces it.
        let draft = match ctx.draft_id.clone() {
            Some(id) => match queries::get_draft(&db, &id)? {
                Some(existing)
                    if existing.start_at == start_at
                        && existing.staff_id == staff_id
                        && existing.service_id == service.id =>
                {
                    existing
                }
                stale => {
                    if stale.is_some() {
                        queries::delete_draft(&db, &id)?;
                    }
                    drafts::create_draft(
                        &db,
                        self.business,
                        &service.id,
                        staff_id.as_deref(),
                        start_at,
                        end_at,
                        ctx.customer_name.as_deref(),
                        ctx.customer_phone.as_deref(),
                        self.now,
                    )?
                }
            },
            None => drafts::create_draft(
                &db,
                self.business,
                &service.id,
                staff_id.as_deref(),
                start_at,
                end_at,
                ctx.customer_name.as_deref(),
                ctx.customer_phone.as_deref(),
                self.now,
            )?,
        };
        ctx.draft_id = Some(draft.id.clone());

        let Some(name) = ctx.customer_name.clone() else {
            return self.ask(
                &db, record, &ctx,
                SlotKind::CustomerName,
                "Can I get your name for the booking?".to_string(),
                vec![],
            );
        };
        queries::set_draft_customer(&db, &draft.id, Some(&name), ctx.customer_phone.as_deref())?;

        self.persist(&db, record, &ctx)?;

        let staff_part = staff_label
            .map(|label| format!(" with {label}"))
            .unwrap_or_default();
        Ok(FlowReply::Confirm {
            draft_id: draft.id,
            preview: format!(
                "{} on {} at {}{staff_part} for {}",
                service.title,
                date.format("%A %Y-%m-%d"),
                time.format("%H:%M"),
                name,
            ),
            phrase: "Shall I book it?".to_string(),
        })
    }

    // ── appointment_confirm ──

    async fn confirm(
        &self,
        record: &mut ConversationRecord,
        mut ctx: AppointmentContext,
    ) -> Result<FlowReply, FlowError> {
        let Some(draft_id) = ctx.draft_id.clone() else {
            // Nothing proposed in this session; a bare "yes" is not ours.
            let db = self.state.db.lock().unwrap();
            self.persist(&db, record, &ctx)?;
            return Ok(FlowReply::Unhandled);
        };

        if ctx.customer_name.is_none() {
            let db = self.state.db.lock().unwrap();
            return self.ask(
                &db, record, &ctx,
                SlotKind::CustomerName,
                "Can I get your name for the booking?".to_string(),
                vec![],
            );
        }

        let confirmed = {
            let mut db = self.state.db.lock().unwrap();
            queries::set_draft_customer(
                &db,
                &draft_id,
                ctx.customer_name.as_deref(),
                ctx.customer_phone.as_deref(),
            )?;
            drafts::confirm_draft(&mut db, self.business, &draft_id, self.now)
        };

        match confirmed {
            Ok(mut appointment) => {
                let mut calendar_synced = false;
                let mut calendar_error = None;

                if let Some(calendar) = &self.state.calendar {
                    let event = {
                        let db = self.state.db.lock().unwrap();
                        self.build_event(&db, &appointment)?
                    };
                    match calendar.insert_event(&event).await {
                        Ok(event_id) => {
                            let db = self.state.db.lock().unwrap();
                            queries::set_calendar_ref(&db, &appointment.id, Some(&event_id))?;
                            appointment.calendar_ref = Some(event_id);
                            calendar_synced = true;
                        }
                        Err(e) => {
                            // The local booking is the source of truth; the
                            // mirror failing must not fail the turn.
                            tracing::error!(
                                appointment = %appointment.id,
                                error = %e,
                                "calendar sync failed"
                            );
                            calendar_error = Some(e.to_string());
                        }
                    }
                }

                let db = self.state.db.lock().unwrap();
                self.clear(&db, record)?;
                Ok(FlowReply::Confirmed {
                    appointment,
                    calendar_synced,
                    calendar_error,
                })
            }
            Err(FlowError::SlotTaken) | Err(FlowError::OutsideHours) => {
                // The draft survived the rollback; only the time has to be
                // renegotiated.
                let db = self.state.db.lock().unwrap();
                let mut cache = BookingCache::new();
                let draft = queries::get_draft(&db, &draft_id)?;

                ctx.time = None;
                let (suggestions, message) = match &draft {
                    Some(draft) => {
                        let date = clock::utc_to_local(self.tz, &draft.start_at).date();
                        ctx.date = Some(date);
                        let duration =
                            (draft.end_at - draft.start_at).num_minutes().max(1) as i32;
                        let suggestions = self.suggest(
                            &db,
                            &mut cache,
                            draft.staff_id.as_deref(),
                            date,
                            duration,
                        )?;
                        (suggestions, "Sorry, that time is no longer available.")
                    }
                    None => (vec![], "Sorry, that time is no longer available."),
                };
                self.ask(
                    &db, record, &ctx,
                    SlotKind::Time,
                    with_suggestions(message, &suggestions),
                    suggestions,
                )
            }
            Err(FlowError::DraftNotFound(id)) => {
                // Deterministic outcome for a double confirm; never leave
                // the session pointing at a consumed draft.
                let db = self.state.db.lock().unwrap();
                self.clear(&db, record)?;
                Err(FlowError::DraftNotFound(id))
            }
            Err(e) => Err(e),
        }
    }

    fn build_event(
        &self,
        db: &Connection,
        appointment: &Appointment,
    ) -> Result<EventInput, FlowError> {
        let service_title = queries::get_service(db, &appointment.service_id)?
            .map(|s| s.title)
            .unwrap_or_else(|| "Appointment".to_string());
        let customer = appointment
            .customer_name
            .clone()
            .unwrap_or_else(|| "customer".to_string());
        Ok(EventInput {
            summary: format!("{service_title}: {customer}"),
            description: format!(
                "{service_title} booked by phone for {customer} at {}",
                self.business.name
            ),
            start: appointment.start_at,
            end: appointment.end_at,
            timezone: self.business.timezone.clone(),
        })
    }

    // ── cancel_appointment ──

    async fn cancel(
        &self,
        record: &mut ConversationRecord,
        mut ctx: AppointmentContext,
    ) -> Result<FlowReply, FlowError> {
        let found = {
            let db = self.state.db.lock().unwrap();

            let Some(date) = ctx.date else {
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Date,
                    "What's the date of the appointment you'd like to cancel?".to_string(),
                    vec![],
                );
            };
            let Some(time) = ctx.time else {
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Time,
                    "What time is that appointment?".to_string(),
                    vec![],
                );
            };
            let Some(name) = ctx.customer_name.clone() else {
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::CustomerName,
                    "And the name on the booking?".to_string(),
                    vec![],
                );
            };

            let Some(start_at) = clock::local_to_utc(self.tz, date, time) else {
                ctx.time = None;
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Time,
                    "That time doesn't exist on that date. What time is the appointment?"
                        .to_string(),
                    vec![],
                );
            };

            let found = queries::find_booked_at(&db, &self.business.id, &start_at, &name)?;
            match &found {
                Some(appointment) => {
                    queries::set_appointment_status(
                        &db,
                        &appointment.id,
                        AppointmentStatus::Cancelled,
                        &self.now,
                    )?;
                }
                None => {
                    self.clear(&db, record)?;
                }
            }
            found
        };

        let Some(mut appointment) = found else {
            return Ok(FlowReply::CancelNotFound);
        };

        let mut calendar_synced = false;
        if let (Some(calendar), Some(event_id)) =
            (&self.state.calendar, appointment.calendar_ref.clone())
        {
            match calendar.delete_event(&event_id).await {
                Ok(()) => calendar_synced = true,
                Err(e) => {
                    tracing::error!(
                        appointment = %appointment.id,
                        error = %e,
                        "calendar delete failed"
                    );
                }
            }
        }

        let db = self.state.db.lock().unwrap();
        self.clear(&db, record)?;
        appointment.status = AppointmentStatus::Cancelled;
        appointment.updated_at = self.now;
        Ok(FlowReply::Cancelled {
            appointment,
            calendar_synced,
        })
    }

    // ── reschedule_appointment ──

    async fn reschedule(
        &self,
        record: &mut ConversationRecord,
        mut ctx: AppointmentContext,
    ) -> Result<FlowReply, FlowError> {
        let moved = {
            let db = self.state.db.lock().unwrap();
            let mut cache = BookingCache::new();

            let Some(name) = ctx.customer_name.clone() else {
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::CustomerName,
                    "Can I get the name on the booking?".to_string(),
                    vec![],
                );
            };

            let Some(appointment) = queries::next_for_customer(
                &db,
                &self.business.id,
                Some(&name),
                ctx.customer_phone.as_deref(),
                &self.now,
            )?
            else {
                self.clear(&db, record)?;
                return Ok(FlowReply::RescheduleNotFound);
            };

            let Some(date) = ctx.date else {
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Date,
                    "What new day works for you?".to_string(),
                    vec![],
                );
            };
            let Some(time) = ctx.time else {
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Time,
                    "What new time works for you?".to_string(),
                    vec![],
                );
            };

            let duration =
                (appointment.end_at - appointment.start_at).num_minutes().max(1) as i32;

            let Some(window) = hours::hours_for(&db, self.business, date)? else {
                ctx.date = None;
                ctx.time = None;
                let open_hours = hours::human_hours(&db, self.business)?;
                let question = if open_hours.is_empty() {
                    "We're closed that day. What other day works for you?".to_string()
                } else {
                    format!(
                        "We're closed that day. We're open {open_hours}. What other day works for you?"
                    )
                };
                return self.ask(&db, record, &ctx, SlotKind::Date, question, vec![]);
            };

            let start_minute = time.hour() * 60 + time.minute();
            if start_minute < window.open_minute
                || start_minute + duration as u32 > window.close_minute
            {
                ctx.time = None;
                let suggestions = self.suggest(
                    &db,
                    &mut cache,
                    appointment.staff_id.as_deref(),
                    date,
                    duration,
                )?;
                let open_hours = hours::human_hours(&db, self.business)?;
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Time,
                    with_suggestions(
                        &format!("That time is outside our business hours ({open_hours})."),
                        &suggestions,
                    ),
                    suggestions,
                );
            }

            let Some(start_at) = clock::local_to_utc(self.tz, date, time) else {
                ctx.time = None;
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Time,
                    "That time doesn't exist on that date. What other time works?".to_string(),
                    vec![],
                );
            };
            let end_at = start_at + Duration::minutes(duration as i64);

            if cache.overlaps(
                &db,
                &self.business.id,
                appointment.staff_id.as_deref(),
                &start_at,
                &end_at,
                Some(&appointment.id),
            )? {
                ctx.time = None;
                let suggestions = self.suggest(
                    &db,
                    &mut cache,
                    appointment.staff_id.as_deref(),
                    date,
                    duration,
                )?;
                return self.ask(
                    &db, record, &ctx,
                    SlotKind::Time,
                    with_suggestions("Sorry, that time slot is already booked.", &suggestions),
                    suggestions,
                );
            }

            queries::update_appointment_window(&db, &appointment.id, &start_at, &end_at, &self.now)?;

            let mut moved = appointment;
            moved.start_at = start_at;
            moved.end_at = end_at;
            moved.updated_at = self.now;
            moved
        };

        let mut calendar_synced = false;
        if let (Some(calendar), Some(event_id)) =
            (&self.state.calendar, moved.calendar_ref.clone())
        {
            match calendar
                .patch_event(&event_id, moved.start_at, moved.end_at)
                .await
            {
                Ok(()) => calendar_synced = true,
                Err(e) => {
                    tracing::error!(
                        appointment = %moved.id,
                        error = %e,
                        "calendar patch failed"
                    );
                }
            }
        }

        let db = self.state.db.lock().unwrap();
        self.clear(&db, record)?;
        Ok(FlowReply::Rescheduled {
            appointment: moved,
            calendar_synced,
        })
    }

    // ── appointment_info ──

    fn info(
        &self,
        record: &mut ConversationRecord,
        ctx: AppointmentContext,
    ) -> Result<FlowReply, FlowError> {
        let db = self.state.db.lock().unwrap();

        if ctx.customer_name.is_none() && ctx.customer_phone.is_none() {
            return self.ask(
                &db, record, &ctx,
                SlotKind::CustomerName,
                "Can I get the name or phone number on the booking?".to_string(),
                vec![],
            );
        }

        let found = queries::next_for_customer(
            &db,
            &self.business.id,
            ctx.customer_name.as_deref(),
            ctx.customer_phone.as_deref(),
            &self.now,
        )?;
        self.clear(&db, record)?;

        Ok(match found {
            Some(appointment) => FlowReply::Info { appointment },
            None => FlowReply::InfoNone,
        })
    }

    // ── availability / staff_availability ──

    fn availability(
        &self,
        record: &mut ConversationRecord,
        mut ctx: AppointmentContext,
    ) -> Result<FlowReply, FlowError> {
        let db = self.state.db.lock().unwrap();
        let mut cache = BookingCache::new();

        let Some(date) = ctx.date else {
            return self.ask(
                &db, record, &ctx,
                SlotKind::Date,
                "What day would you like me to check?".to_string(),
                vec![],
            );
        };

        let staff_id = match &ctx.staff_name {
            Some(name) if self.business.staff_scheduling => {
                match queries::find_staff_by_name(&db, &self.business.id, name)? {
                    Some(member) => Some(member.id),
                    None => {
                        let missing = name.clone();
                        ctx.staff_name = None;
                        return self.ask(
                            &db, record, &ctx,
                            SlotKind::Staff,
                            format!("I couldn't find {missing} on our team. Whose availability should I check?"),
                            vec![],
                        );
                    }
                }
            }
            _ => None,
        };

        let duration = match &ctx.service_id {
            Some(service_id) => queries::get_service(&db, service_id)?
                .map(|s| s.duration_minutes)
                .unwrap_or(self.state.config.default_duration_minutes),
            None => self.state.config.default_duration_minutes,
        };

        let window = match (ctx.window_start, ctx.window_end) {
            (None, None) => None,
            (from, to) => Some((
                from.unwrap_or(chrono::NaiveTime::MIN),
                to.unwrap_or_else(|| chrono::NaiveTime::from_hms_opt(23, 59, 0).unwrap()),
            )),
        };

        let times = scheduling::find_slots(
            &db,
            &mut cache,
            self.business,
            staff_id.as_deref(),
            date,
            duration,
            self.state.config.max_suggestions,
            window,
            self.state.config.slot_step_minutes,
        )?;

        self.clear(&db, record)?;

        Ok(if times.is_empty() {
            FlowReply::AvailabilityNone { date }
        } else {
            FlowReply::Availability {
                date,
                times: times.iter().map(|t| t.format("%H:%M").to_string()).collect(),
            }
        })
    }
}

fn with_suggestions(message: &str, suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        format!("{message} What other time works for you?")
    } else {
        format!("{message} How about: {}?", suggestions.join(", "))
    }
}
