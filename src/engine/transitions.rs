use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// A time-driven status change the scheduler owes a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub booking_id: Ulid,
    pub room_id: Ulid,
    pub from: BookingStatus,
    pub to: BookingStatus,
}

impl Transition {
    /// The transition due for `booking` at `now`, if any.
    pub fn due(booking: &Booking, now: Ms) -> Option<Self> {
        let to = match booking.status {
            BookingStatus::Confirmed if booking.start_at <= now && now < booking.end_at => {
                BookingStatus::InProgress
            }
            BookingStatus::InProgress if booking.end_at <= now => BookingStatus::Ended,
            _ => return None,
        };
        Some(Self {
            booking_id: booking.id,
            room_id: booking.room_id,
            from: booking.status,
            to,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub started: Vec<Ulid>,
    pub ended: Vec<Ulid>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.ended.is_empty()
    }
}

impl Engine {
    /// Scan for due transitions without blocking: rooms currently locked by a
    /// writer are skipped and picked up on a later tick.
    pub fn collect_due_transitions(&self, now: Ms) -> Vec<Transition> {
        let mut due = Vec::new();
        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                due.extend(guard.bookings.iter().filter_map(|b| Transition::due(b, now)));
            }
        }
        due
    }

    /// Apply a transition if the booking is still in its source status.
    /// `Ok(None)` means someone else already moved it.
    pub async fn apply_transition(&self, t: &Transition) -> Result<Option<Booking>, EngineError> {
        let mut guard = self.resolve_booking_write(&t.booking_id).await?;
        let current = guard
            .booking(&t.booking_id)
            .ok_or(EngineError::BookingNotFound(t.booking_id))?;
        if current.status != t.from {
            return Ok(None);
        }
        let event = Event::BookingStatusChanged {
            id: t.booking_id,
            room_id: t.room_id,
            status: t.to,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// One scheduler sweep: CONFIRMED → IN_PROGRESS for bookings under way,
    /// IN_PROGRESS → ENDED for bookings past their end. Running it again with
    /// the same `now` changes nothing.
    pub async fn tick(&self, now: Ms) -> TickReport {
        let mut report = TickReport::default();
        for t in self.collect_due_transitions(now) {
            match self.apply_transition(&t).await {
                Ok(Some(booking)) => {
                    metrics::counter!(
                        crate::observability::SCHEDULER_TRANSITIONS_TOTAL,
                        "to" => t.to.as_str()
                    )
                    .increment(1);
                    match t.to {
                        BookingStatus::InProgress => {
                            tracing::info!(booking_id = %booking.id, title = %booking.title, "meeting started");
                            report.started.push(booking.id);
                        }
                        _ => {
                            tracing::info!(booking_id = %booking.id, title = %booking.title, "meeting ended");
                            report.ended.push(booking.id);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Room deleted or booking gone since the scan
                    tracing::debug!("scheduler skip {}: {e}", t.booking_id);
                }
            }
        }
        report
    }
}
