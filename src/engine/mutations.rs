use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    APPOINTMENTS_BOOKED_TOTAL, APPOINTMENTS_CANCELLED_TOTAL, APPOINTMENTS_RESCHEDULED_TOTAL,
    BOOKING_CONFLICTS_TOTAL, HOLDS_PLACED_TOTAL, IDEMPOTENT_REPLAYS_TOTAL,
};

use super::availability::{find_conflict, now_ms, validate_span};
use super::{Engine, EngineError, WalCommand};

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub staff_id: Ulid,
    pub span: Span,
    pub client_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub hold_id: Ulid,
    pub staff_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub span: Span,
    pub source: BookingSource,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    /// True when the idempotency key matched an existing appointment and no
    /// write happened.
    pub idempotent: bool,
}

/// Does this hold bind to this booking request? Staff and span must match
/// exactly; client and service are compared only when the hold carries them.
/// Returns the first mismatching field.
pub fn hold_matches(hold: &SlotHold, req: &BookingRequest) -> Result<(), &'static str> {
    if hold.staff_id != req.staff_id {
        return Err("staff");
    }
    if hold.span != req.span {
        return Err("span");
    }
    if let Some(client_id) = hold.client_id
        && client_id != req.client_id {
            return Err("client");
        }
    if let Some(service_id) = hold.service_id
        && service_id != req.service_id {
            return Err("service");
        }
    Ok(())
}

impl Engine {
    pub async fn register_staff(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        if self.staff.len() >= MAX_STAFF_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("staff name too long"));
        }
        if self.staff.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StaffRegistered {
            id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.staff
            .insert(id, Arc::new(RwLock::new(StaffTimeline::new(id, name))));
        Ok(())
    }

    /// Place a 2-minute exclusive hold on a staff member's window. Gated by
    /// the conflict scan under the timeline's write lock; on conflict the
    /// checker's reason is returned unchanged and nothing is written.
    pub async fn place_hold(&self, req: HoldRequest) -> Result<SlotHold, EngineError> {
        validate_span(&req.span)?;
        let timeline = self
            .get_staff(&req.staff_id)
            .ok_or(EngineError::NotFound(req.staff_id))?;
        let mut guard = timeline.write().await;
        if guard.entry_count() >= MAX_TIMELINE_ENTRIES_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many timeline entries"));
        }

        let now = now_ms();
        if let Some(conflict) = find_conflict(&guard, &req.span, None, None, now) {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "reason" => conflict.label()).increment(1);
            return Err(EngineError::SlotUnavailable(conflict));
        }

        let hold = SlotHold {
            id: Ulid::new(),
            staff_id: req.staff_id,
            span: req.span,
            client_id: req.client_id,
            service_id: req.service_id,
            expires_at: now + HOLD_TTL_MS,
        };
        let event = Event::HoldPlaced {
            id: hold.id,
            staff_id: hold.staff_id,
            span: hold.span,
            client_id: hold.client_id,
            service_id: hold.service_id,
            expires_at: hold.expires_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(HOLDS_PLACED_TOTAL).increment(1);
        Ok(hold)
    }

    /// Delete a hold. Holds expire lazily on their own; this exists for
    /// storage reclamation (the reaper) and is never required for
    /// correctness.
    pub async fn release_hold(&self, hold_id: Ulid) -> Result<Ulid, EngineError> {
        let staff_id = self
            .staff_for_hold(&hold_id)
            .ok_or(EngineError::NotFound(hold_id))?;
        let timeline = self
            .get_staff(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let mut guard = timeline.write().await;
        if guard.hold(&hold_id).is_none() {
            return Err(EngineError::NotFound(hold_id));
        }
        let event = Event::HoldReleased {
            id: hold_id,
            staff_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(staff_id)
    }

    /// Convert a valid, unexpired hold into a BOOKED appointment. The whole
    /// sequence — idempotency replay, hold binding, availability re-check,
    /// insert-and-consume — runs under the staff timeline's write lock, and
    /// the insert plus hold deletion travel as one WAL record.
    pub async fn create_appointment(
        &self,
        req: BookingRequest,
    ) -> Result<BookingOutcome, EngineError> {
        validate_span(&req.span)?;
        if let Some(key) = &req.idempotency_key {
            if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(EngineError::LimitExceeded("bad idempotency key length"));
            }
            // Fast path before locking: a committed retry target may live on
            // any staff member if the caller replayed with a different staff.
            if let Some(appointment) = self.find_by_idempotency_key(key).await {
                metrics::counter!(IDEMPOTENT_REPLAYS_TOTAL).increment(1);
                return Ok(BookingOutcome {
                    appointment,
                    idempotent: true,
                });
            }
        }

        let timeline = self
            .get_staff(&req.staff_id)
            .ok_or(EngineError::NotFound(req.staff_id))?;
        let mut guard = timeline.write().await;

        // Re-check under the lock: a concurrent retry with the same key
        // serializes here and must observe the first insert.
        if let Some(key) = &req.idempotency_key
            && let Some(id) = self.index.idempotency.get(key).map(|e| *e.value())
            && let Some(appointment) = guard.appointment(&id).cloned() {
                metrics::counter!(IDEMPOTENT_REPLAYS_TOTAL).increment(1);
                return Ok(BookingOutcome {
                    appointment,
                    idempotent: true,
                });
            }

        if guard.entry_count() >= MAX_TIMELINE_ENTRIES_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many timeline entries"));
        }

        let now = now_ms();
        let hold = match guard.hold(&req.hold_id) {
            Some(h) if h.is_active(now) => h.clone(),
            // Expired holds are indistinguishable from absent ones.
            Some(_) => return Err(EngineError::InvalidHold(req.hold_id)),
            None => {
                // A hold that exists on a different staff member is a binding
                // mismatch, not a missing hold.
                if self.staff_for_hold(&req.hold_id).is_some() {
                    return Err(EngineError::HoldMismatch("staff"));
                }
                return Err(EngineError::InvalidHold(req.hold_id));
            }
        };

        if let Err(field) = hold_matches(&hold, &req) {
            return Err(EngineError::HoldMismatch(field));
        }

        // The hold's existence alone doesn't prove the window stayed clear;
        // re-scan in the same critical section, skipping the hold we are
        // about to consume (it always overlaps its own window).
        if let Some(conflict) = find_conflict(&guard, &req.span, None, Some(req.hold_id), now) {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "reason" => conflict.label()).increment(1);
            return Err(EngineError::SlotUnavailable(conflict));
        }

        let appointment = Appointment {
            id: Ulid::new(),
            staff_id: req.staff_id,
            client_id: req.client_id,
            service_id: req.service_id,
            span: req.span,
            status: AppointmentStatus::Booked,
            source: req.source,
            idempotency_key: req.idempotency_key.clone(),
        };
        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
            consumed_hold: Some(req.hold_id),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(APPOINTMENTS_BOOKED_TOTAL).increment(1);
        tracing::debug!(appointment = %appointment.id, staff = %req.staff_id, "appointment booked");
        Ok(BookingOutcome {
            appointment,
            idempotent: false,
        })
    }

    /// Unconditional status write to Cancelled. Re-cancelling an already
    /// cancelled appointment succeeds; the row is never deleted.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Ulid,
    ) -> Result<Appointment, EngineError> {
        let (staff_id, mut guard) = self.resolve_appointment_write(&appointment_id).await?;
        if guard.appointment(&appointment_id).is_none() {
            return Err(EngineError::NotFound(appointment_id));
        }
        let event = Event::AppointmentCancelled {
            id: appointment_id,
            staff_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(APPOINTMENTS_CANCELLED_TOTAL).increment(1);
        guard
            .appointment(&appointment_id)
            .cloned()
            .ok_or(EngineError::NotFound(appointment_id))
    }

    /// Move a BOOKED appointment to a new window on the same staff member.
    /// The conflict scan excludes the appointment's own id so it never
    /// collides with its current position.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Ulid,
        new_span: Span,
    ) -> Result<Appointment, EngineError> {
        validate_span(&new_span)?;
        let (staff_id, mut guard) = self.resolve_appointment_write(&appointment_id).await?;
        let existing = guard
            .appointment(&appointment_id)
            .ok_or(EngineError::NotFound(appointment_id))?;
        if !existing.is_booked() {
            return Err(EngineError::NotActive(appointment_id));
        }

        let now = now_ms();
        if let Some(conflict) = find_conflict(&guard, &new_span, Some(appointment_id), None, now) {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "reason" => conflict.label()).increment(1);
            return Err(EngineError::SlotUnavailable(conflict));
        }

        let event = Event::AppointmentRescheduled {
            id: appointment_id,
            staff_id,
            span: new_span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(APPOINTMENTS_RESCHEDULED_TOTAL).increment(1);
        guard
            .appointment(&appointment_id)
            .cloned()
            .ok_or(EngineError::NotFound(appointment_id))
    }

    /// Scan all timelines for holds past their expiry. Read-only; the
    /// reaper feeds the result to `release_hold`.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.staff.iter() {
            let timeline = entry.value().clone();
            if let Ok(guard) = timeline.try_read() {
                for hold in &guard.holds {
                    if !hold.is_active(now) {
                        expired.push((hold.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Cancelled appointments survive (they are
    /// history, not garbage); expired holds do not.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let now = now_ms();
        let mut events = Vec::new();

        for entry in self.staff.iter() {
            let timeline = entry.value().clone();
            let guard = timeline.read().await;

            events.push(Event::StaffRegistered {
                id: guard.id,
                name: guard.name.clone(),
            });
            for appointment in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    appointment: appointment.clone(),
                    consumed_hold: None,
                });
            }
            for hold in &guard.holds {
                if !hold.is_active(now) {
                    continue;
                }
                events.push(Event::HoldPlaced {
                    id: hold.id,
                    staff_id: hold.staff_id,
                    span: hold.span,
                    client_id: hold.client_id,
                    service_id: hold.service_id,
                    expires_at: hold.expires_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
