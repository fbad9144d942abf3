use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Two half-open intervals overlap iff `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Booked,
    Cancelled,
}

/// Which channel a booking came in through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingSource {
    Whatsapp,
    Voice,
    Dashboard,
    Manual,
}

/// A confirmed booking on one staff member's timeline. Never physically
/// deleted — cancellation flips `status`, reschedule rewrites `span`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub source: BookingSource,
    pub idempotency_key: Option<String>,
}

impl Appointment {
    pub fn is_booked(&self) -> bool {
        self.status == AppointmentStatus::Booked
    }
}

/// A 2-minute exclusive claim on a staff member's window. Client and
/// service are advisory at hold time; they may be attached at booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotHold {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub span: Span,
    pub client_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub expires_at: Ms,
}

impl SlotHold {
    pub fn is_active(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

/// One staff member's timeline: appointments and holds, each sorted by
/// `span.start` so overlap scans can binary-search the right edge.
#[derive(Debug, Clone)]
pub struct StaffTimeline {
    pub id: Ulid,
    pub name: String,
    pub appointments: Vec<Appointment>,
    pub holds: Vec<SlotHold>,
}

impl StaffTimeline {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            appointments: Vec::new(),
            holds: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.appointments.len() + self.holds.len()
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn insert_hold(&mut self, hold: SlotHold) {
        let pos = self
            .holds
            .binary_search_by_key(&hold.span.start, |h| h.span.start)
            .unwrap_or_else(|e| e);
        self.holds.insert(pos, hold);
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn appointment_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    pub fn hold(&self, id: &Ulid) -> Option<&SlotHold> {
        self.holds.iter().find(|h| h.id == *id)
    }

    pub fn remove_hold(&mut self, id: &Ulid) -> Option<SlotHold> {
        if let Some(pos) = self.holds.iter().position(|h| h.id == *id) {
            Some(self.holds.remove(pos))
        } else {
            None
        }
    }

    /// Appointments whose span overlaps the query window, any status.
    /// Everything at index >= the partition point starts at or after
    /// `query.end` and can't overlap.
    pub fn overlapping_appointments(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    /// Holds whose span overlaps the query window, expired ones included —
    /// callers filter by `is_active` where it matters.
    pub fn overlapping_holds(&self, query: &Span) -> impl Iterator<Item = &SlotHold> {
        let right_bound = self.holds.partition_point(|h| h.span.start < query.end);
        self.holds[..right_bound]
            .iter()
            .filter(move |h| h.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StaffRegistered {
        id: Ulid,
        name: String,
    },
    HoldPlaced {
        id: Ulid,
        staff_id: Ulid,
        span: Span,
        client_id: Option<Ulid>,
        service_id: Option<Ulid>,
        expires_at: Ms,
    },
    HoldReleased {
        id: Ulid,
        staff_id: Ulid,
    },
    /// Insert the appointment and delete the consumed hold as one record,
    /// so the two replay together or not at all. `consumed_hold` is `None`
    /// only for compaction snapshots.
    AppointmentBooked {
        appointment: Appointment,
        consumed_hold: Option<Ulid>,
    },
    AppointmentCancelled {
        id: Ulid,
        staff_id: Ulid,
    },
    AppointmentRescheduled {
        id: Ulid,
        staff_id: Ulid,
        span: Span,
    },
}

// ── Query result types ───────────────────────────────────────────

/// An uncovered interval within the business window for one staff member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub staff_id: Ulid,
    pub staff_name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffInfo {
    pub id: Ulid,
    pub name: String,
}
