use ulid::Ulid;

use crate::model::*;

use super::timeline::room_slots;
use super::{Engine, EngineError, SharedRoomState};

impl Engine {
    /// Every live room with its count of non-cancelled bookings, by name.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let handles: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(handles.len());
        for rs in handles {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            rooms.push(RoomInfo {
                room: guard.room.clone(),
                booking_count: guard.active_booking_count(),
            });
        }
        rooms.sort_by(|a, b| a.room.name.cmp(&b.room.name).then(a.room.id.cmp(&b.room.id)));
        rooms
    }

    pub async fn get_room(&self, id: Ulid) -> Option<Room> {
        let rs = self.get_room_state(&id)?;
        let guard = rs.read().await;
        (!guard.deleted).then(|| guard.room.clone())
    }

    pub async fn room_info(&self, id: Ulid) -> Option<RoomInfo> {
        let rs = self.get_room_state(&id)?;
        let guard = rs.read().await;
        (!guard.deleted).then(|| RoomInfo {
            room: guard.room.clone(),
            booking_count: guard.active_booking_count(),
        })
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        self.booking_detail(id).await.map(|d| d.booking)
    }

    pub async fn booking_detail(&self, id: Ulid) -> Option<BookingDetail> {
        let room_id = self.room_for_booking(&id)?;
        let rs = self.get_room_state(&room_id)?;
        let guard = rs.read().await;
        let booking = guard.booking(&id)?.clone();
        Some(BookingDetail {
            booking,
            room: guard.room.clone(),
        })
    }

    /// Bookings matching `filter`, each with its room, ascending by start.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<BookingDetail> {
        let handles: Vec<SharedRoomState> = match filter.room_id {
            Some(rid) => self.get_room_state(&rid).into_iter().collect(),
            None => self.rooms.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = self.collect_bookings(handles, |b| filter.matches(b)).await;
        out.sort_by(|a, b| {
            a.booking
                .start_at
                .cmp(&b.booking.start_at)
                .then(a.booking.id.cmp(&b.booking.id))
        });
        out
    }

    /// Bookings made with `email` (exact match), most recent start first.
    pub async fn list_bookings_by_email(&self, email: &str) -> Vec<BookingDetail> {
        let handles: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = self.collect_bookings(handles, |b| b.email == email).await;
        out.sort_by(|a, b| {
            b.booking
                .start_at
                .cmp(&a.booking.start_at)
                .then(b.booking.id.cmp(&a.booking.id))
        });
        out
    }

    async fn collect_bookings(
        &self,
        handles: Vec<SharedRoomState>,
        keep: impl Fn(&Booking) -> bool,
    ) -> Vec<BookingDetail> {
        let mut out = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            out.extend(guard.bookings.iter().filter(|b| keep(b)).map(|b| BookingDetail {
                booking: b.clone(),
                room: guard.room.clone(),
            }));
        }
        out
    }

    /// The slot timeline of a room for the day containing `day`.
    pub async fn room_slots_for(&self, room_id: Ulid, day: Ms, now: Ms) -> Result<Vec<SlotInfo>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(room_id));
        }
        Ok(room_slots(&guard, day, now))
    }
}
