use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Whole-batch validation for `set_availability`: one bad window rejects all of them.
pub fn validate_windows(windows: &[WindowSpec]) -> Result<(), EngineError> {
    if windows.len() > MAX_WINDOWS_PER_LANDLORD {
        return Err(EngineError::LimitExceeded("too many availability windows"));
    }
    for (i, w) in windows.iter().enumerate() {
        if w.day_of_week > 6 {
            return Err(EngineError::Validation(format!(
                "window {i}: day of week must be between 0 and 6, got {}",
                w.day_of_week
            )));
        }
        if w.start_time >= w.end_time {
            return Err(EngineError::Validation(format!(
                "window {i}: start time {} must be before end time {}",
                w.start_time, w.end_time
            )));
        }
    }
    Ok(())
}

/// Stable presentation order: weekday, then start time.
pub(super) fn sort_windows(windows: &mut [AvailabilityWindow]) {
    windows.sort_by_key(|w| (w.day_of_week, w.start_time, w.end_time));
}
