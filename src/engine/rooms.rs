use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::room_channel;

use super::conflict::{now_ms, validate_room};
use super::{Engine, EngineError};

/// Treat empty strings the way an absent field is treated.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl Engine {
    pub async fn create_room(&self, id: Ulid, draft: RoomDraft) -> Result<Room, EngineError> {
        let room = Room {
            id,
            name: present(draft.name).ok_or(EngineError::MissingField("name"))?,
            color: present(draft.color).ok_or(EngineError::MissingField("color"))?,
            capacity: draft.capacity.ok_or(EngineError::MissingField("capacity"))?,
            slot_duration: draft.slot_duration.unwrap_or(DEFAULT_SLOT_MINUTES),
            available_from: draft.available_from.unwrap_or(DEFAULT_AVAILABLE_FROM),
            available_to: draft.available_to.unwrap_or(DEFAULT_AVAILABLE_TO),
        };
        validate_room(&room)?;

        let _registry = self.registry.lock().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms
            .insert(id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        tracing::info!(room_id = %id, name = %room.name, "room created");
        Ok(room)
    }

    /// Change only the fields present in `patch`; the merged room must still
    /// be valid.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let mut guard = self.room_write(&id).await?;
        if patch.is_empty() {
            return Ok(guard.room.clone());
        }
        let room = patch.apply_to(&guard.room);
        validate_room(&room)?;

        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room)
    }

    /// Delete a room and its bookings. Refused while any booking that is not
    /// cancelled or ended still starts in the future.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut guard = self.room_write(&id).await?;

        let now = now_ms();
        let upcoming = guard
            .bookings
            .iter()
            .filter(|b| {
                b.start_at > now
                    && !matches!(b.status, BookingStatus::Cancelled | BookingStatus::Ended)
            })
            .count();
        if upcoming > 0 {
            return Err(EngineError::RoomInUse {
                room_id: id,
                upcoming,
            });
        }

        self.wal_append(&Event::RoomDeleted { id }).await?;
        guard.deleted = true;
        for b in &guard.bookings {
            self.booking_to_room.remove(&b.id);
        }
        drop(guard);
        self.rooms.remove(&id);
        self.notify.remove(&room_channel(&id));
        tracing::info!(room_id = %id, "room deleted");
        Ok(())
    }
}
