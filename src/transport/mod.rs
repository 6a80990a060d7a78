//! Chat/notification transport seam
//!
//! The engine talks to the chat platform only through [`Transport`]. Every call
//! made by engine components goes through the [`TransportGate`], which bounds
//! concurrency and retries rate-limited calls.

pub mod gate;
pub mod mock;

pub use gate::TransportGate;
pub use mock::{MockTransport, TransportCall};

use crate::rating::RatingChange;
use crate::types::{ClassPair, RequestContext, SessionId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors reported by a transport implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transport unavailable: {message}")]
    Unavailable { message: String },

    #[error("Request rejected: {message}")]
    Rejected { message: String },
}

impl TransportError {
    /// Rejections are permanent; everything else may succeed on retry
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected { .. })
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Handle to an isolated match session (thread or channel) on the platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
    pub name: String,
}

/// Per-player summary posted when a match opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCard {
    pub user_id: UserId,
    pub display_name: String,
    pub rating: f64,
    pub trust_points: i32,
    pub classes: Option<ClassPair>,
}

/// Messages the engine delivers to users, sessions and staff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    Queued {
        rating: f64,
    },
    NoOpponentFound,
    MatchFound {
        session_name: String,
        opponent: UserId,
    },
    MatchReady {
        session_id: SessionId,
        players: Vec<PlayerCard>,
    },
    ResultRecorded {
        user_id: UserId,
        wins: u8,
    },
    ResultsMismatch,
    ResultWithdrawn {
        user_id: UserId,
    },
    TimeoutDefaulted {
        winner: UserId,
        loser: UserId,
    },
    MatchResolved {
        changes: Vec<RatingChange>,
    },
    CancellationProposed {
        proposer: UserId,
    },
    CancellationAccepted,
    CancelledByStaff,
    CancellationEscalated {
        session_id: SessionId,
        proposer: UserId,
        responder: UserId,
    },
    DisputeReported {
        session_id: SessionId,
        reporter: UserId,
    },
    TrustReviewNeeded {
        user_id: UserId,
        trust_points: i32,
    },
    SessionError {
        message: String,
    },
}

impl Notice {
    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Notice::Queued { .. } => "queued",
            Notice::NoOpponentFound => "no_opponent_found",
            Notice::MatchFound { .. } => "match_found",
            Notice::MatchReady { .. } => "match_ready",
            Notice::ResultRecorded { .. } => "result_recorded",
            Notice::ResultsMismatch => "results_mismatch",
            Notice::ResultWithdrawn { .. } => "result_withdrawn",
            Notice::TimeoutDefaulted { .. } => "timeout_defaulted",
            Notice::MatchResolved { .. } => "match_resolved",
            Notice::CancellationProposed { .. } => "cancellation_proposed",
            Notice::CancellationAccepted => "cancellation_accepted",
            Notice::CancelledByStaff => "cancelled_by_staff",
            Notice::CancellationEscalated { .. } => "cancellation_escalated",
            Notice::DisputeReported { .. } => "dispute_reported",
            Notice::TrustReviewNeeded { .. } => "trust_review_needed",
            Notice::SessionError { .. } => "session_error",
        }
    }
}

/// Operations consumed from the chat/notification platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a private session visible only to the participants
    async fn create_isolated_session(
        &self,
        name: &str,
        participants: &[UserId],
    ) -> TransportResult<SessionHandle>;

    async fn send_to_session(&self, handle: &SessionHandle, notice: &Notice) -> TransportResult<()>;

    /// Reply visible only to the requesting user
    async fn send_ephemeral_reply(
        &self,
        context: &RequestContext,
        notice: &Notice,
    ) -> TransportResult<()>;

    async fn grant_role(&self, user_id: &UserId, role: &str) -> TransportResult<()>;

    async fn revoke_role(&self, user_id: &UserId, role: &str) -> TransportResult<()>;

    async fn delete_session(&self, handle: &SessionHandle) -> TransportResult<()>;

    /// Notify moderators
    async fn alert_staff(&self, notice: &Notice) -> TransportResult<()>;
}
