use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;
pub const MINUTES_PER_DAY: u32 = 1440;

pub const DEFAULT_SLOT_MINUTES: u32 = 30;
/// 08:00
pub const DEFAULT_AVAILABLE_FROM: u32 = 480;
/// 20:00
pub const DEFAULT_AVAILABLE_TO: u32 = 1200;

/// Wall-clock now. A clock set before 1970 reads as the epoch.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Milliseconds elapsed since the start of the (UTC) day containing `t`.
pub fn ms_of_day(t: Ms) -> Ms {
    t.rem_euclid(DAY_MS)
}

/// Start of the (UTC) day containing `t`.
pub fn day_start(t: Ms) -> Ms {
    t - ms_of_day(t)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Number of `slot_minutes` slots needed to cover `duration_ms`, rounded up.
pub fn slots_for(duration_ms: Ms, slot_minutes: u32) -> u32 {
    let slot_ms = Ms::from(slot_minutes.max(1)) * MINUTE_MS;
    if duration_ms <= 0 {
        return 0;
    }
    ((duration_ms + slot_ms - 1) / slot_ms) as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub color: String,
    pub capacity: u32,
    pub slot_duration: u32,
    /// Minute of day the room opens.
    pub available_from: u32,
    /// Minute of day the room closes.
    pub available_to: u32,
}

/// Room fields as supplied by a create request. Required fields are still
/// optional here so that a missing one is reported as a validation error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomDraft {
    pub name: Option<String>,
    pub color: Option<String>,
    pub capacity: Option<u32>,
    pub slot_duration: Option<u32>,
    pub available_from: Option<u32>,
    pub available_to: Option<u32>,
}

/// Partial room update. `Some` means "set this field", including to values
/// that fail validation (e.g. a zero capacity is rejected, not ignored).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub capacity: Option<u32>,
    pub slot_duration: Option<u32>,
    pub available_from: Option<u32>,
    pub available_to: Option<u32>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        *self == RoomPatch::default()
    }

    pub fn apply_to(&self, room: &Room) -> Room {
        Room {
            id: room.id,
            name: self.name.clone().unwrap_or_else(|| room.name.clone()),
            color: self.color.clone().unwrap_or_else(|| room.color.clone()),
            capacity: self.capacity.unwrap_or(room.capacity),
            slot_duration: self.slot_duration.unwrap_or(room.slot_duration),
            available_from: self.available_from.unwrap_or(room.available_from),
            available_to: self.available_to.unwrap_or(room.available_to),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    InProgress,
    Ended,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Ended => "ENDED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "IN_PROGRESS" => Some(BookingStatus::InProgress),
            "ENDED" => Some(BookingStatus::Ended),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether a booking in this status still occupies its interval.
    pub fn occupies(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub title: String,
    pub start_at: Ms,
    /// May precede `start_at` once a not-yet-started booking is ended early.
    pub end_at: Ms,
    pub attendees: u32,
    pub slots: u32,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl Booking {
    /// The time this booking blocks. Empty when `end_at <= start_at`.
    pub fn span(&self) -> Span {
        Span {
            start: self.start_at,
            end: self.end_at,
        }
    }

    /// Half-open intersection with `[start, end)`, ignoring cancelled bookings.
    pub fn blocks(&self, start: Ms, end: Ms) -> bool {
        self.status.occupies()
            && self.start_at < self.end_at
            && self.start_at < end
            && self.end_at > start
    }
}

/// A booking request as supplied by a client. Every field is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_id: Option<Ulid>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub start_at: Option<Ms>,
    pub end_at: Option<Ms>,
    pub attendees: Option<u32>,
}

/// Optional filters for listing bookings. `from` keeps bookings starting at or
/// after it; `to` keeps bookings ending at or before it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub from: Option<Ms>,
    pub to: Option<Ms>,
    pub room_id: Option<Ulid>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.from.is_none_or(|from| booking.start_at >= from)
            && self.to.is_none_or(|to| booking.end_at <= to)
            && self.room_id.is_none_or(|rid| booking.room_id == rid)
    }
}

/// A room together with all of its bookings, sorted by `start_at`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
    /// Set under the write lock when the room is deleted, so that writers
    /// which resolved the room earlier back off.
    pub deleted: bool,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
            deleted: false,
        }
    }

    /// Insert booking maintaining sort order by start_at.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.start_at <= booking.start_at);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Non-cancelled bookings intersecting `[start, end)`. Bookings starting
    /// at or after `end` are skipped by binary search.
    pub fn blocking(&self, start: Ms, end: Ms) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start_at < end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.blocks(start, end))
    }

    pub fn active_booking_count(&self) -> usize {
        self.bookings.iter().filter(|b| b.status.occupies()).count()
    }
}

/// WAL record format. One flat event per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
    },
    BookingEnded {
        id: Ulid,
        room_id: Ulid,
        end_at: Ms,
    },
    BookingExtended {
        id: Ulid,
        room_id: Ulid,
        end_at: Ms,
        slots: u32,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room: Room,
    /// Non-cancelled bookings referencing the room.
    pub booking_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDetail {
    pub booking: Booking,
    pub room: Room,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Available,
    Booked,
    Past,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Available => "available",
            SlotState::Booked => "booked",
            SlotState::Past => "past",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub span: Span,
    pub state: SlotState,
}
