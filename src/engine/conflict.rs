use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) use crate::model::now_ms;

pub(crate) fn validate_interval(start: Ms, end: Ms) -> Result<(), EngineError> {
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if start >= end {
        return Err(EngineError::Invalid("end time must be after start time".into()));
    }
    if end - start > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

/// Reject a room whose fields break the registry invariants.
pub(crate) fn validate_room(room: &Room) -> Result<(), EngineError> {
    if room.name.is_empty() {
        return Err(EngineError::MissingField("name"));
    }
    if room.color.is_empty() {
        return Err(EngineError::MissingField("color"));
    }
    if room.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if room.color.len() > MAX_COLOR_LEN {
        return Err(EngineError::LimitExceeded("color too long"));
    }
    if room.capacity < 1 {
        return Err(EngineError::Invalid("capacity must be at least 1".into()));
    }
    if room.slot_duration < 1 || room.slot_duration > MINUTES_PER_DAY {
        return Err(EngineError::Invalid(format!(
            "slot duration must be between 1 and {MINUTES_PER_DAY} minutes"
        )));
    }
    if room.available_to > MINUTES_PER_DAY {
        return Err(EngineError::Invalid(format!(
            "available_to must be at most {MINUTES_PER_DAY}"
        )));
    }
    if room.available_from >= room.available_to {
        return Err(EngineError::Invalid(
            "available_from must be before available_to".into(),
        ));
    }
    Ok(())
}

/// Fail with the first non-cancelled booking intersecting `[start, end)`,
/// other than `exclude`.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    start: Ms,
    end: Ms,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match rs
        .blocking(start, end)
        .find(|b| Some(b.id) != exclude)
    {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}

/// An extension may not run past closing time, nor into the next day.
/// Both are measured on the day the booking starts, so a booking that
/// already runs past midnight can never be extended, even when the new end
/// falls within the next day's opening hours.
pub(crate) fn check_within_hours(room: &Room, booking: &Booking, new_end: Ms) -> Result<(), EngineError> {
    let closing = day_start(booking.start_at) + Ms::from(room.available_to) * MINUTE_MS;
    if day_start(new_end - 1) != day_start(booking.start_at) || new_end > closing {
        return Err(EngineError::Invalid(format!(
            "extension past room closing time ({:02}:{:02})",
            room.available_to / 60,
            room.available_to % 60
        )));
    }
    Ok(())
}
