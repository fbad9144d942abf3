use ulid::Ulid;

use super::availability::ConflictReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Id does not resolve under this tenant.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Hold id unknown, or the hold has expired.
    InvalidHold(Ulid),
    /// The hold exists but does not bind to the requested booking.
    HoldMismatch(&'static str),
    /// The window conflicts with an active appointment or hold.
    SlotUnavailable(ConflictReason),
    /// Operation invalid for the appointment's lifecycle state.
    NotActive(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Conflict errors signal a precondition violated by concurrent or
    /// stale state; the caller may retry with fresh data.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidHold(_)
                | EngineError::HoldMismatch(_)
                | EngineError::SlotUnavailable(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidHold(id) => write!(f, "invalid or expired hold: {id}"),
            EngineError::HoldMismatch(field) => write!(f, "hold mismatch on {field}"),
            EngineError::SlotUnavailable(reason) => {
                write!(f, "slot unavailable: conflicts with {reason}")
            }
            EngineError::NotActive(id) => write!(f, "appointment not active: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
