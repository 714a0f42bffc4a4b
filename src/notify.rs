//! At-most-once broadcast of booking lifecycle events.
//!
//! Observers subscribe to a named channel and receive whatever is emitted
//! while they are subscribed. Nothing is persisted or replayed, and a receiver
//! that falls more than [`CHANNEL_CAPACITY`] events behind loses the oldest
//! ones.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Booking;

pub const CHANNEL_CAPACITY: usize = 256;

/// Channel carrying every booking event.
pub const ALL_BOOKINGS_CHANNEL: &str = "bookings";

/// Channel carrying the events of a single room.
pub fn room_channel(room_id: &Ulid) -> String {
    format!("room_{room_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BookingEvent {
    #[serde(rename = "booking.created")]
    Created,
    #[serde(rename = "booking.started")]
    Started,
    #[serde(rename = "booking.ended")]
    Ended,
    #[serde(rename = "booking.extended")]
    Extended,
    #[serde(rename = "booking.cancelled")]
    Cancelled,
}

impl BookingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BookingEvent::Created => "booking.created",
            BookingEvent::Started => "booking.started",
            BookingEvent::Ended => "booking.ended",
            BookingEvent::Extended => "booking.extended",
            BookingEvent::Cancelled => "booking.cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub event: BookingEvent,
    pub booking: Booking,
}

impl Notice {
    /// JSON payload as delivered to listeners.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"event\":\"{}\"}}", self.event.name()))
    }
}

pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Notice> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Broadcast to the global channel and to the booking's room channel.
    /// Returns how many receivers were reached; zero when nobody listens.
    pub fn emit(&self, event: BookingEvent, booking: &Booking) -> usize {
        let notice = Notice {
            event,
            booking: booking.clone(),
        };
        let mut reached = 0;
        for channel in [ALL_BOOKINGS_CHANNEL.to_string(), room_channel(&booking.room_id)] {
            if let Some(sender) = self.channels.get(&channel) {
                reached += sender.send(notice.clone()).unwrap_or(0);
            }
        }
        metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "event" => event.name())
            .increment(1);
        reached
    }

    /// Drop a channel; its subscribers see the stream close.
    pub fn remove(&self, channel: &str) {
        self.channels.remove(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;

    fn booking(room_id: Ulid) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id,
            name: "Grace".into(),
            email: "grace@example.com".into(),
            phone: "555-0199".into(),
            title: "Planning".into(),
            start_at: 1_000,
            end_at: 2_000,
            attendees: 3,
            slots: 1,
            status: BookingStatus::Confirmed,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn global_and_room_channels_both_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut all = hub.subscribe(ALL_BOOKINGS_CHANNEL);
        let mut room = hub.subscribe(&room_channel(&rid));

        let b = booking(rid);
        assert_eq!(hub.emit(BookingEvent::Created, &b), 2);

        assert_eq!(all.recv().await.unwrap().booking, b);
        let n = room.recv().await.unwrap();
        assert_eq!(n.event, BookingEvent::Created);
    }

    #[tokio::test]
    async fn other_rooms_are_not_notified() {
        let hub = NotifyHub::new();
        let mut other = hub.subscribe(&room_channel(&Ulid::new()));
        hub.emit(BookingEvent::Started, &booking(Ulid::new()));
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn emit_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        assert_eq!(hub.emit(BookingEvent::Ended, &booking(Ulid::new())), 0);
    }

    #[test]
    fn payload_names_the_event() {
        let notice = Notice {
            event: BookingEvent::Extended,
            booking: booking(Ulid::new()),
        };
        let parsed: serde_json::Value = serde_json::from_str(&notice.payload()).unwrap();
        assert_eq!(parsed["event"], "booking.extended");
        assert_eq!(parsed["booking"]["status"], "CONFIRMED");
        assert_eq!(parsed["booking"]["attendees"], 3);
    }

    #[tokio::test]
    async fn removed_channel_closes_receivers() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(&room_channel(&rid));
        hub.remove(&room_channel(&rid));
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
