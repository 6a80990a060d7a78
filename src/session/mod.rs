//! Match sessions: state machine, registry and timer-driven coordination

pub mod coordinator;
pub mod registry;
pub mod state;

pub use coordinator::{SessionCoordinator, SessionTimings, SubmitReceipt};
pub use registry::{SessionRegistry, SharedSession};
pub use state::{
    CancellationDecision, MatchOutcome, MatchSession, SessionPhase, SessionView, SubmitOutcome,
};
