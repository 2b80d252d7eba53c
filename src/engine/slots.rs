use std::collections::{BTreeSet, HashSet};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::*;

// ── Slot Generation ───────────────────────────────────────────────

/// Window used for any weekday the landlord has not configured: 09:00 to 17:00.
pub fn fallback_window() -> (NaiveTime, NaiveTime) {
    (
        NaiveTime::from_hms_opt(9, 0, 0).expect("09:00 is a valid time"),
        NaiveTime::from_hms_opt(17, 0, 0).expect("17:00 is a valid time"),
    )
}

/// Contiguous slot starts inside `[start, end)` on `date`.
/// A trailing slot that would run past `end` is dropped.
pub fn tile_window(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Vec<NaiveDateTime> {
    let duration = slot_duration();
    let end = date.and_time(end);
    let mut cursor = date.and_time(start);
    let mut starts = Vec::new();
    while cursor + duration <= end {
        starts.push(cursor);
        cursor = cursor + duration;
    }
    starts
}

/// Enumerate the slots of `date` for a landlord's window set.
///
/// Only active windows on the date's weekday count; with none, the fallback
/// window applies. Starts are deduplicated across overlapping windows and
/// returned in order. Booked slots stay in the output flagged unavailable.
pub fn generate_slots(
    windows: &[AvailabilityWindow],
    date: NaiveDate,
    booked: &HashSet<NaiveDateTime>,
) -> Vec<Slot> {
    let day = day_of_week(date);
    let mut ranges: Vec<(NaiveTime, NaiveTime)> = windows
        .iter()
        .filter(|w| w.is_active && w.day_of_week == day)
        .map(|w| (w.start_time, w.end_time))
        .collect();
    if ranges.is_empty() {
        ranges.push(fallback_window());
    }

    let starts: BTreeSet<NaiveDateTime> = ranges
        .into_iter()
        .flat_map(|(start, end)| tile_window(date, start, end))
        .collect();

    let duration = slot_duration();
    starts
        .into_iter()
        .map(|start| Slot {
            start,
            end: start + duration,
            is_available: !booked.contains(&start),
        })
        .collect()
}
