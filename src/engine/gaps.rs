use crate::model::*;

// ── Gap Calculator ────────────────────────────────────────────────

/// Business window as millisecond offsets from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub open_offset_ms: Ms,
    pub close_offset_ms: Ms,
}

impl BusinessHours {
    /// 09:00–18:00.
    pub const DEFAULT: BusinessHours = BusinessHours {
        open_offset_ms: 9 * 3_600_000,
        close_offset_ms: 18 * 3_600_000,
    };

    /// The concrete window for a day starting at `day_start` (local midnight
    /// in unix ms — the transport layer owns timezone conversion).
    pub fn window(&self, day_start: Ms) -> Span {
        Span::new(day_start + self.open_offset_ms, day_start + self.close_offset_ms)
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Sweep one staff member's day: walk booked appointments starting inside
/// the business window in start order, emitting the uncovered ranges.
/// Holds are intentionally invisible here — gaps reflect confirmed
/// bookings only.
pub fn gaps_in_window(timeline: &StaffTimeline, window: &Span) -> Vec<Span> {
    let mut gaps = Vec::new();
    let mut cursor = window.start;

    for appointment in &timeline.appointments {
        if !appointment.is_booked() {
            continue;
        }
        if !window.contains_instant(appointment.span.start) {
            continue;
        }
        if appointment.span.start > cursor {
            gaps.push(Span::new(cursor, appointment.span.start));
        }
        cursor = cursor.max(appointment.span.end);
    }

    if cursor < window.end {
        gaps.push(Span::new(cursor, window.end));
    }

    gaps
}
