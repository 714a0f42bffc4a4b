use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, check_within_hours, now_ms, validate_interval};
use super::{Engine, EngineError};

fn required_text(value: Option<String>, field: &'static str, max_len: usize) -> Result<String, EngineError> {
    let value = value
        .filter(|s| !s.trim().is_empty())
        .ok_or(EngineError::MissingField(field))?;
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(value)
}

/// The persisted booking, failing when the event did not concern one.
fn applied(booking: Option<Booking>, id: Ulid) -> Result<Booking, EngineError> {
    booking.ok_or(EngineError::BookingNotFound(id))
}

impl Engine {
    /// Reserve a room. The overlap check and the insert happen under the
    /// room's write lock, so two overlapping requests cannot both succeed.
    pub async fn create_booking(&self, id: Ulid, req: BookingRequest) -> Result<Booking, EngineError> {
        let name = required_text(req.name, "name", MAX_CONTACT_LEN)?;
        let email = required_text(req.email, "email", MAX_CONTACT_LEN)?;
        let phone = required_text(req.phone, "phone", MAX_CONTACT_LEN)?;
        let title = required_text(req.title, "title", MAX_TITLE_LEN)?;
        let room_id = req.room_id.ok_or(EngineError::MissingField("room_id"))?;
        let start_at = req.start_at.ok_or(EngineError::MissingField("start_at"))?;
        let end_at = req.end_at.ok_or(EngineError::MissingField("end_at"))?;
        let attendees = req
            .attendees
            .filter(|n| *n > 0)
            .ok_or(EngineError::MissingField("attendees"))?;

        let mut guard = self.room_write(&room_id).await?;
        let room = &guard.room;
        if attendees > room.capacity {
            return Err(EngineError::CapacityExceeded {
                requested: attendees,
                capacity: room.capacity,
            });
        }
        validate_interval(start_at, end_at)?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        if self.booking_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        check_no_conflict(&guard, start_at, end_at, None)?;

        let booking = Booking {
            id,
            room_id,
            name,
            email,
            phone,
            title,
            start_at,
            end_at,
            attendees,
            slots: slots_for(end_at - start_at, guard.room.slot_duration),
            status: BookingStatus::Confirmed,
            created_at: now_ms(),
        };
        let event = Event::BookingCreated { booking };
        let booking = applied(self.persist_and_apply(&mut guard, &event).await?, id)?;
        tracing::info!(booking_id = %id, room_id = %room_id, title = %booking.title, "booking created");
        Ok(booking)
    }

    /// End a booking now, whatever its progress. A booking that has not
    /// started yet is ended too; its `end_at` then precedes `start_at` and it
    /// no longer occupies any time. The end never moves later than it was.
    pub async fn end_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.end_booking_at(id, now_ms()).await
    }

    pub async fn end_booking_at(&self, id: Ulid, now: Ms) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        match booking.status {
            BookingStatus::Cancelled => {
                return Err(EngineError::InvalidState {
                    id,
                    status: booking.status,
                });
            }
            BookingStatus::Ended => return Ok(booking.clone()),
            BookingStatus::Confirmed | BookingStatus::InProgress => {}
        }
        // An overdue booking not yet swept keeps its scheduled end; the next
        // booking may start right there.
        let event = Event::BookingEnded {
            id,
            room_id: booking.room_id,
            end_at: now.min(booking.end_at),
        };
        applied(self.persist_and_apply(&mut guard, &event).await?, id)
    }

    /// Push the end of an in-progress booking back by `minutes`. Only the
    /// added window `[end, end + minutes)` is checked for conflicts; the
    /// existing span is already conflict-free.
    pub async fn extend_booking(&self, id: Ulid, minutes: i64) -> Result<Booking, EngineError> {
        if minutes <= 0 {
            return Err(EngineError::Invalid(
                "extension must be a positive number of minutes".into(),
            ));
        }
        if minutes > MAX_EXTENSION_MINUTES {
            return Err(EngineError::LimitExceeded("extension too long"));
        }

        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        if booking.status != BookingStatus::InProgress {
            return Err(EngineError::InvalidState {
                id,
                status: booking.status,
            });
        }

        let current_end = booking.end_at;
        let new_end = current_end + minutes * MINUTE_MS;
        check_within_hours(&guard.room, booking, new_end)?;
        check_no_conflict(&guard, current_end, new_end, Some(id))?;

        let event = Event::BookingExtended {
            id,
            room_id: booking.room_id,
            end_at: new_end,
            slots: slots_for(new_end - booking.start_at, guard.room.slot_duration),
        };
        let booking = applied(self.persist_and_apply(&mut guard, &event).await?, id)?;
        tracing::info!(booking_id = %id, minutes, "booking extended");
        Ok(booking)
    }

    /// Withdraw a booking that has not started. Cancelled bookings free their
    /// interval and never change status again.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidState {
                id,
                status: booking.status,
            });
        }
        let event = Event::BookingStatusChanged {
            id,
            room_id: booking.room_id,
            status: BookingStatus::Cancelled,
        };
        applied(self.persist_and_apply(&mut guard, &event).await?, id)
    }
}
