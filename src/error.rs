//! Error types for the matchmaking service
//!
//! All fallible operations return the anyhow-based [`Result`]. Domain failures are
//! raised as [`MatchmakingError`] and can be classified into an [`ErrorKind`] at the
//! command boundary to decide what the user sees.

use serde::{Deserialize, Serialize};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Broad error categories used for propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input shape, no state change
    Validation,
    /// Target already in a terminal or locked condition, no state change
    Conflict,
    /// Referenced entity is missing
    NotFound,
    /// Rate limited or transient transport failure, retried internally
    ExternalTransient,
    /// Transport retries exhausted
    ExternalFatal,
    /// Internal consistency broken, operation aborted
    Invariant,
    /// Anything else (lock poisoning, serialization, configuration)
    Internal,
}

impl ErrorKind {
    /// Whether the error message can be shown to the user as-is
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::NotFound
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::ExternalTransient => write!(f, "external_transient"),
            ErrorKind::ExternalFatal => write!(f, "external_fatal"),
            ErrorKind::Invariant => write!(f, "invariant"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid result: {reason}")]
    InvalidResult { reason: String },

    #[error("User {user_id} is not a participant of session {session_id}")]
    NotAParticipant { user_id: String, session_id: String },

    #[error("Invalid class selection: {reason}")]
    InvalidClassSelection { reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("User already queued: {user_id}")]
    AlreadyQueued { user_id: String },

    #[error("User already in an active match: {user_id}")]
    AlreadyInMatch { user_id: String },

    #[error("Results already locked for session {session_id}")]
    ResultsLocked { session_id: String },

    #[error("Result already submitted by {user_id}")]
    DuplicateSubmission { user_id: String },

    #[error("Season already open: {name}")]
    SeasonAlreadyOpen { name: String },

    #[error("No open season")]
    NoOpenSeason,

    #[error("User already stayed this season: {user_id}")]
    AlreadyStayed { user_id: String },

    #[error("User already registered: {user_id}")]
    AlreadyRegistered { user_id: String },

    #[error("Game id already registered: {game_id}")]
    GameIdTaken { game_id: String },

    #[error("Cancellation already pending for session {session_id}")]
    CancellationPending { session_id: String },

    #[error("No cancellation pending for session {session_id}")]
    NoCancellationPending { session_id: String },

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Season not found: {season}")]
    SeasonNotFound { season: String },

    #[error("Transport call {operation} failed transiently: {message}")]
    TransportTransient { operation: String, message: String },

    #[error("Transport call {operation} failed after {attempts} attempts: {message}")]
    TransportFailed {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Map the variant onto its propagation category
    pub fn kind(&self) -> ErrorKind {
        use MatchmakingError::*;
        match self {
            InvalidResult { .. }
            | NotAParticipant { .. }
            | InvalidClassSelection { .. }
            | InvalidRequest { .. } => ErrorKind::Validation,
            AlreadyQueued { .. }
            | AlreadyInMatch { .. }
            | ResultsLocked { .. }
            | DuplicateSubmission { .. }
            | SeasonAlreadyOpen { .. }
            | NoOpenSeason
            | AlreadyStayed { .. }
            | AlreadyRegistered { .. }
            | GameIdTaken { .. }
            | CancellationPending { .. }
            | NoCancellationPending { .. } => ErrorKind::Conflict,
            UserNotFound { .. } | SessionNotFound { .. } | SeasonNotFound { .. } => {
                ErrorKind::NotFound
            }
            TransportTransient { .. } => ErrorKind::ExternalTransient,
            TransportFailed { .. } => ErrorKind::ExternalFatal,
            InvariantViolation { .. } => ErrorKind::Invariant,
            ConfigurationError { .. } | InternalError { .. } => ErrorKind::Internal,
        }
    }
}

/// Classify an arbitrary error, defaulting to [`ErrorKind::Internal`]
pub fn classify(error: &anyhow::Error) -> ErrorKind {
    error
        .downcast_ref::<MatchmakingError>()
        .map(MatchmakingError::kind)
        .unwrap_or(ErrorKind::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = MatchmakingError::InvalidResult {
            reason: "wins must be 0, 1 or 2".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = MatchmakingError::AlreadyQueued {
            user_id: "alice".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = MatchmakingError::TransportFailed {
            operation: "delete_session".to_string(),
            attempts: 5,
            message: "gateway down".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ExternalFatal);
        assert!(!err.kind().is_user_visible());
    }

    #[test]
    fn test_classify_through_anyhow() {
        let err: anyhow::Error = MatchmakingError::NoOpenSeason.into();
        assert_eq!(classify(&err), ErrorKind::Conflict);

        let err = anyhow::anyhow!("something unrelated");
        assert_eq!(classify(&err), ErrorKind::Internal);
    }
}
