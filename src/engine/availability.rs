use crate::model::*;

use super::EngineError;

// ── Availability Checker ──────────────────────────────────────────

/// What an availability probe ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    Appointment(ulid::Ulid),
    Hold(ulid::Ulid),
}

impl ConflictReason {
    pub fn label(&self) -> &'static str {
        match self {
            ConflictReason::Appointment(_) => "appointment",
            ConflictReason::Hold(_) => "hold",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::Appointment(id) => write!(f, "appointment {id}"),
            ConflictReason::Hold(id) => write!(f, "hold {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Free,
    Busy(ConflictReason),
}

impl Availability {
    pub fn is_free(&self) -> bool {
        matches!(self, Availability::Free)
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// The one conflict predicate behind every availability decision.
///
/// Scans booked appointments first, then unexpired holds, so an appointment
/// conflict wins the reported reason. `exclude_appointment` lets reschedule
/// skip the appointment being moved; `exclude_hold` lets booking skip the
/// hold it is about to consume (which necessarily overlaps its own window).
///
/// Every mutation runs this under the staff timeline's write lock, so the
/// check and the subsequent write are a single critical section.
pub fn find_conflict(
    timeline: &StaffTimeline,
    span: &Span,
    exclude_appointment: Option<ulid::Ulid>,
    exclude_hold: Option<ulid::Ulid>,
    now: Ms,
) -> Option<ConflictReason> {
    for appointment in timeline.overlapping_appointments(span) {
        if !appointment.is_booked() {
            continue;
        }
        if exclude_appointment == Some(appointment.id) {
            continue;
        }
        return Some(ConflictReason::Appointment(appointment.id));
    }

    for hold in timeline.overlapping_holds(span) {
        if !hold.is_active(now) {
            continue; // expired holds are inert rows
        }
        if exclude_hold == Some(hold.id) {
            continue;
        }
        return Some(ConflictReason::Hold(hold.id));
    }

    None
}
