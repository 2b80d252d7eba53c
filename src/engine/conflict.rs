use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Wall-clock "now" in the single local timezone the engine operates in.
pub fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub(crate) fn validate_future(starts_at: NaiveDateTime, now: NaiveDateTime) -> Result<(), EngineError> {
    if starts_at <= now {
        return Err(EngineError::Validation(
            "Appointment date must be in the future".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_notes(notes: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

/// Fails if another Pending/Confirmed appointment already starts at `starts_at`.
/// The caller must hold the apartment's write lock until its own event is applied.
pub(crate) fn check_slot_free(
    book: &ApartmentBook,
    starts_at: NaiveDateTime,
    except: Option<Ulid>,
) -> Result<(), EngineError> {
    if book.holder_of(starts_at, except).is_some() {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict {
            apartment_id: book.apartment_id,
            starts_at,
        });
    }
    Ok(())
}
