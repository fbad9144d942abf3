use ulid::Ulid;

use crate::model::*;

use super::availability::{find_conflict, now_ms, validate_span};
use super::gaps::gaps_in_window;
use super::{Availability, Engine, EngineError};

impl Engine {
    /// Is this window free of booked appointments and unexpired holds?
    /// Pure read — the same predicate runs again inside every mutation,
    /// under the write lock, so this result is advisory by the time a write
    /// happens. `exclude_appointment` is for reschedule previews.
    pub async fn check_availability(
        &self,
        staff_id: Ulid,
        span: Span,
        exclude_appointment: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        validate_span(&span)?;
        let timeline = self
            .get_staff(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let guard = timeline.read().await;
        Ok(
            match find_conflict(&guard, &span, exclude_appointment, None, now_ms()) {
                None => Availability::Free,
                Some(reason) => Availability::Busy(reason),
            },
        )
    }

    pub async fn get_appointment(&self, appointment_id: &Ulid) -> Option<Appointment> {
        let staff_id = self.staff_for_appointment(appointment_id)?;
        let timeline = self.get_staff(&staff_id)?;
        let guard = timeline.read().await;
        guard.appointment(appointment_id).cloned()
    }

    /// Resolve an idempotency key to the appointment it committed, if any.
    pub async fn find_by_idempotency_key(&self, key: &str) -> Option<Appointment> {
        let appointment_id = self.index.idempotency.get(key).map(|e| *e.value())?;
        let staff_id = self.staff_for_appointment(&appointment_id)?;
        let timeline = self.get_staff(&staff_id)?;
        let guard = timeline.read().await;
        guard.appointment(&appointment_id).cloned()
    }

    /// All appointments (any status) overlapping the window, across staff,
    /// ordered by start.
    pub async fn list_appointments_in(&self, window: Span) -> Vec<Appointment> {
        let mut out = Vec::new();
        for entry in self.staff.iter() {
            let timeline = entry.value().clone();
            let guard = timeline.read().await;
            out.extend(guard.overlapping_appointments(&window).cloned());
        }
        out.sort_by_key(|a| a.span.start);
        out
    }

    /// Unexpired holds on one staff member's timeline, ordered by start.
    pub async fn list_holds(&self, staff_id: Ulid) -> Result<Vec<SlotHold>, EngineError> {
        let timeline = self
            .get_staff(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let guard = timeline.read().await;
        let now = now_ms();
        Ok(guard
            .holds
            .iter()
            .filter(|h| h.is_active(now))
            .cloned()
            .collect())
    }

    /// Registered staff, sorted by display name.
    pub async fn list_staff(&self) -> Vec<StaffInfo> {
        let mut out = Vec::new();
        for entry in self.staff.iter() {
            let timeline = entry.value().clone();
            let guard = timeline.read().await;
            out.push(StaffInfo {
                id: guard.id,
                name: guard.name.clone(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Uncovered business-window ranges for the day starting at `day_start`
    /// (local midnight in unix ms), optionally for a single staff member.
    /// Reflects confirmed bookings only; holds never widen or narrow gaps.
    pub async fn list_gaps(
        &self,
        day_start: Ms,
        staff_id: Option<Ulid>,
    ) -> Result<Vec<Gap>, EngineError> {
        let window = self.business_hours.window(day_start);

        let mut staff = self.list_staff().await;
        if let Some(id) = staff_id {
            staff.retain(|s| s.id == id);
            if staff.is_empty() {
                return Err(EngineError::NotFound(id));
            }
        }

        let mut gaps = Vec::new();
        for info in staff {
            let Some(timeline) = self.get_staff(&info.id) else {
                continue;
            };
            let guard = timeline.read().await;
            for span in gaps_in_window(&guard, &window) {
                gaps.push(Gap {
                    staff_id: info.id,
                    staff_name: info.name.clone(),
                    span,
                });
            }
        }
        Ok(gaps)
    }
}
