use chrono::NaiveDateTime;
use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Ulid),
    Unauthorized(String),
    Conflict {
        apartment_id: Ulid,
        starts_at: NaiveDateTime,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::NotFound(id) => write!(f, "appointment not found: {id}"),
            EngineError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            EngineError::Conflict {
                apartment_id,
                starts_at,
            } => write!(
                f,
                "This time slot is already booked (apartment {apartment_id}, {starts_at})"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
