use thiserror::Error;
use uuid::Uuid;

/// Error category reported to callers alongside the detail message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("court not found: {0}")]
    CourtNotFound(Uuid),
    #[error("booking not found: {0}")]
    BookingNotFound(Uuid),
    #[error("account not found: {0}")]
    AccountNotFound(Uuid),
    #[error("equipment not found: {0}")]
    EquipmentNotFound(Uuid),
    #[error("availability slot not found: {0}")]
    SlotNotFound(Uuid),
    #[error("slot not available: conflicts with booking {0}")]
    SlotTaken(Uuid),
    #[error("booking start must be in the future")]
    StartInPast,
    #[error("booking must fall within court operating hours")]
    OutsideOperatingHours,
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::CourtNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::AccountNotFound(_)
            | EngineError::EquipmentNotFound(_)
            | EngineError::SlotNotFound(_) => ErrorKind::NotFound,
            EngineError::SlotTaken(_)
            | EngineError::StartInPast
            | EngineError::OutsideOperatingHours
            | EngineError::AlreadyExists(_) => ErrorKind::Conflict,
            EngineError::InvalidInput(_) | EngineError::LimitExceeded(_) => ErrorKind::Invalid,
            EngineError::Wal(_) => ErrorKind::Internal,
        }
    }
}
