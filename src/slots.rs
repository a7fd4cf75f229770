//! Hour-slot availability over a field's daily timetable.

use chrono::{NaiveTime, Timelike};
use serde::Serialize;

/// Business hours of every field; the timetable renders one slot per hour.
pub const OPEN_HOUR: u32 = 8;
pub const CLOSE_HOUR: u32 = 22;

/// A booked interval within one day, in minutes from midnight, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedSpan {
    pub start_min: u32,
    pub end_min: u32,
}

impl ReservedSpan {
    pub fn new(start_time: NaiveTime, duration_hours: i32) -> Self {
        let start_min = start_time.hour() * 60 + start_time.minute();
        // Saturate rather than wrap: a hostile duration must not produce a
        // span with end_min < start_min, which would slip past every overlap
        // check.
        let duration_min = (duration_hours.max(0) as u32).saturating_mul(60);
        Self {
            start_min,
            end_min: start_min.saturating_add(duration_min),
        }
    }

    pub fn overlaps(&self, other: &ReservedSpan) -> bool {
        self.start_min < other.end_min && other.start_min < self.end_min
    }
}

/// Whether the span lies entirely inside opening hours. Also bounds the
/// duration: nothing longer than the 14-hour business day can pass.
pub fn within_business_hours(span: &ReservedSpan) -> bool {
    span.start_min >= OPEN_HOUR * 60 && span.end_min <= CLOSE_HOUR * 60
}

/// Whether the hour slot `[hour, hour+1)` intersects any reserved span.
pub fn is_slot_reserved(spans: &[ReservedSpan], hour: u32) -> bool {
    let slot = ReservedSpan { start_min: hour * 60, end_min: (hour + 1) * 60 };
    spans.iter().any(|span| span.overlaps(&slot))
}

#[derive(Debug, Serialize)]
pub struct SlotStatus {
    pub start_hour: u32,
    pub end_hour: u32,
    pub reserved: bool,
}

/// The full day's timetable as rendered to clients.
pub fn day_slots(spans: &[ReservedSpan]) -> Vec<SlotStatus> {
    (OPEN_HOUR..CLOSE_HOUR)
        .map(|hour| SlotStatus {
            start_hour: hour,
            end_hour: hour + 1,
            reserved: is_slot_reserved(spans, hour),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: &str, hours: i32) -> ReservedSpan {
        ReservedSpan::new(NaiveTime::parse_from_str(start, "%H:%M").unwrap(), hours)
    }

    #[test]
    fn reservation_covers_its_own_slots() {
        let spans = [span("14:00", 2)];
        assert!(is_slot_reserved(&spans, 14));
        assert!(is_slot_reserved(&spans, 15));
    }

    #[test]
    fn adjacent_slot_after_end_is_free() {
        // 14:00-16:00 must not mark the 16:00-17:00 slot.
        let spans = [span("14:00", 2)];
        assert!(!is_slot_reserved(&spans, 16));
        assert!(!is_slot_reserved(&spans, 13));
    }

    #[test]
    fn exact_boundary_does_not_bleed() {
        // 13:00-14:00 does not reserve the 14:00-15:00 slot.
        let spans = [span("13:00", 1)];
        assert!(is_slot_reserved(&spans, 13));
        assert!(!is_slot_reserved(&spans, 14));
    }

    #[test]
    fn half_hour_start_blocks_both_touched_slots() {
        let spans = [span("14:30", 1)];
        assert!(is_slot_reserved(&spans, 14));
        assert!(is_slot_reserved(&spans, 15));
        assert!(!is_slot_reserved(&spans, 16));
    }

    #[test]
    fn span_overlap_is_half_open() {
        assert!(span("14:00", 2).overlaps(&span("15:00", 2)));
        assert!(!span("14:00", 2).overlaps(&span("16:00", 1)));
        assert!(!span("13:00", 1).overlaps(&span("14:00", 1)));
    }

    #[test]
    fn oversized_duration_saturates_instead_of_wrapping() {
        let s = span("14:00", i32::MAX);
        assert!(s.end_min > s.start_min);
        assert!(is_slot_reserved(&[s], 14));
        assert!(is_slot_reserved(&[s], 21));
        assert!(!within_business_hours(&s));
    }

    #[test]
    fn business_hours_accept_full_day_and_reject_out_of_range() {
        assert!(within_business_hours(&span("08:00", 14)));
        assert!(within_business_hours(&span("14:00", 2)));
        assert!(!within_business_hours(&span("07:00", 1)));
        assert!(!within_business_hours(&span("21:00", 2)));
        assert!(!within_business_hours(&span("08:00", 15)));
    }

    #[test]
    fn day_slots_runs_open_to_close() {
        let slots = day_slots(&[]);
        assert_eq!(slots.len(), (CLOSE_HOUR - OPEN_HOUR) as usize);
        assert_eq!(slots.first().unwrap().start_hour, OPEN_HOUR);
        assert_eq!(slots.last().unwrap().end_hour, CLOSE_HOUR);
        assert!(slots.iter().all(|s| !s.reserved));
    }
}
