use ulid::Ulid;

use crate::model::BookingStatus;

/// Stable classification of engine failures, independent of wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Capacity,
    Conflict,
    State,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Conflict => "conflict",
            ErrorKind::State => "state",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    MissingField(&'static str),
    Invalid(String),
    LimitExceeded(&'static str),
    RoomNotFound(Ulid),
    BookingNotFound(Ulid),
    AlreadyExists(Ulid),
    CapacityExceeded { requested: u32, capacity: u32 },
    /// The requested interval intersects this booking.
    Conflict(Ulid),
    /// The room still has upcoming bookings.
    RoomInUse { room_id: Ulid, upcoming: usize },
    InvalidState { id: Ulid, status: BookingStatus },
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MissingField(_) | EngineError::Invalid(_) | EngineError::LimitExceeded(_) => {
                ErrorKind::Validation
            }
            EngineError::RoomNotFound(_) | EngineError::BookingNotFound(_) => ErrorKind::NotFound,
            EngineError::CapacityExceeded { .. } => ErrorKind::Capacity,
            EngineError::AlreadyExists(_)
            | EngineError::Conflict(_)
            | EngineError::RoomInUse { .. } => ErrorKind::Conflict,
            EngineError::InvalidState { .. } => ErrorKind::State,
            EngineError::WalError(_) => ErrorKind::Unexpected,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingField(field) => write!(f, "missing required field: {field}"),
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::CapacityExceeded {
                requested,
                capacity,
            } => write!(
                f,
                "capacity exceeded: {requested} attendees for a room of {capacity}"
            ),
            EngineError::Conflict(id) => write!(f, "time slot not available: overlaps booking {id}"),
            EngineError::RoomInUse { room_id, upcoming } => write!(
                f,
                "cannot delete room {room_id}: {upcoming} upcoming booking(s)"
            ),
            EngineError::InvalidState { id, status } => {
                write!(f, "booking {id} is {status}; operation not allowed")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
