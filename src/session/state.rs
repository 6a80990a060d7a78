//! Match session state machine
//!
//! Pure state transitions; timers are stored here but armed and fired by the
//! coordinator. Every terminal transition sets `results_locked`, after which
//! the session rejects all further input and only waits to be torn down.

use crate::error::{MatchmakingError, Result};
use crate::transport::SessionHandle;
use crate::types::{ClassPair, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

/// Game-win counts reported for both players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub player1_wins: u8,
    pub player2_wins: u8,
}

impl MatchOutcome {
    pub fn new(player1_wins: u8, player2_wins: u8) -> Self {
        Self {
            player1_wins,
            player2_wins,
        }
    }

    /// Best-of-three results: one side has 2, the other 0 or 1
    pub fn is_valid(&self) -> bool {
        matches!(
            (self.player1_wins, self.player2_wins),
            (2, 0) | (2, 1) | (0, 2) | (1, 2)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingResults,
    CancellationPending { proposer: UserId },
    Resolved,
    Cancelled,
    Disputed,
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Only this side has reported; `arm_timer` is set when no timer is running
    AwaitingOpponent { arm_timer: bool },
    /// Both reported an impossible combination; both sides were cleared
    Disagreement { reported: MatchOutcome },
    /// Both reported a valid outcome and the session is now locked
    Resolved(MatchOutcome),
}

/// How a cancellation response ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationDecision {
    Accepted,
    Escalated,
}

/// Immutable facts about a session, safe to use outside its lock
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub id: SessionId,
    pub player1: UserId,
    pub player2: UserId,
    pub player1_classes: Option<ClassPair>,
    pub player2_classes: Option<ClassPair>,
    pub handle: SessionHandle,
    pub created_at: DateTime<Utc>,
}

impl SessionView {
    pub fn participants(&self) -> [UserId; 2] {
        [self.player1.clone(), self.player2.clone()]
    }

    pub fn opponent_of(&self, user_id: &str) -> Option<&UserId> {
        if self.player1 == user_id {
            Some(&self.player2)
        } else if self.player2 == user_id {
            Some(&self.player1)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct ArmedTimer {
    epoch: u64,
    handle: AbortHandle,
}

/// One 1v1 match between pairing and teardown
#[derive(Debug)]
pub struct MatchSession {
    view: SessionView,
    player1_result: Option<u8>,
    player2_result: Option<u8>,
    results_locked: bool,
    phase: SessionPhase,
    result_timer: Option<ArmedTimer>,
    cancellation_timer: Option<ArmedTimer>,
    timer_epoch: u64,
}

impl MatchSession {
    pub fn new(view: SessionView) -> Self {
        Self {
            view,
            player1_result: None,
            player2_result: None,
            results_locked: false,
            phase: SessionPhase::AwaitingResults,
            result_timer: None,
            cancellation_timer: None,
            timer_epoch: 0,
        }
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn id(&self) -> SessionId {
        self.view.id
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn results_locked(&self) -> bool {
        self.results_locked
    }

    pub fn results(&self) -> (Option<u8>, Option<u8>) {
        (self.player1_result, self.player2_result)
    }

    pub fn has_result_timer(&self) -> bool {
        self.result_timer.is_some()
    }

    pub fn has_cancellation_timer(&self) -> bool {
        self.cancellation_timer.is_some()
    }

    fn slot_mut(&mut self, user_id: &str) -> Result<&mut Option<u8>> {
        if self.view.player1 == user_id {
            Ok(&mut self.player1_result)
        } else if self.view.player2 == user_id {
            Ok(&mut self.player2_result)
        } else {
            Err(MatchmakingError::NotAParticipant {
                user_id: user_id.to_string(),
                session_id: self.view.id.to_string(),
            }
            .into())
        }
    }

    fn ensure_participant(&self, user_id: &str) -> Result<()> {
        if self.view.opponent_of(user_id).is_some() {
            Ok(())
        } else {
            Err(MatchmakingError::NotAParticipant {
                user_id: user_id.to_string(),
                session_id: self.view.id.to_string(),
            }
            .into())
        }
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.results_locked {
            return Err(MatchmakingError::ResultsLocked {
                session_id: self.view.id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Record one player's game-win count
    pub fn submit_result(&mut self, user_id: &str, wins: u8) -> Result<SubmitOutcome> {
        self.ensure_participant(user_id)?;
        self.ensure_unlocked()?;
        if let SessionPhase::CancellationPending { .. } = self.phase {
            return Err(MatchmakingError::CancellationPending {
                session_id: self.view.id.to_string(),
            }
            .into());
        }
        if self.slot_mut(user_id)?.is_some() {
            return Err(MatchmakingError::DuplicateSubmission {
                user_id: user_id.to_string(),
            }
            .into());
        }
        if wins > 2 {
            return Err(MatchmakingError::InvalidResult {
                reason: format!("wins must be 0, 1 or 2, got {}", wins),
            }
            .into());
        }

        *self.slot_mut(user_id)? = Some(wins);

        let (Some(player1_wins), Some(player2_wins)) = (self.player1_result, self.player2_result)
        else {
            return Ok(SubmitOutcome::AwaitingOpponent {
                arm_timer: self.result_timer.is_none(),
            });
        };

        let outcome = MatchOutcome::new(player1_wins, player2_wins);
        if outcome.is_valid() {
            self.lock_as(SessionPhase::Resolved);
            Ok(SubmitOutcome::Resolved(outcome))
        } else {
            self.player1_result = None;
            self.player2_result = None;
            self.disarm_result_timer();
            Ok(SubmitOutcome::Disagreement { reported: outcome })
        }
    }

    /// Clear the caller's own unresolved result
    pub fn withdraw_result(&mut self, user_id: &str) -> Result<()> {
        self.ensure_participant(user_id)?;
        self.ensure_unlocked()?;
        let slot = self.slot_mut(user_id)?;
        if slot.take().is_none() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "No result to withdraw".to_string(),
            }
            .into());
        }
        self.disarm_result_timer();
        Ok(())
    }

    /// Default decision when only one side reported before the deadline
    ///
    /// Returns `None` for a stale timer or when the session moved on.
    pub fn apply_timeout(&mut self, epoch: u64) -> Option<MatchOutcome> {
        if self.results_locked || self.result_timer.as_ref().map(|t| t.epoch) != Some(epoch) {
            return None;
        }
        self.result_timer = None;

        let outcome = match (self.player1_result, self.player2_result) {
            (Some(_), None) => MatchOutcome::new(2, 0),
            (None, Some(_)) => MatchOutcome::new(0, 2),
            _ => return None,
        };
        self.player1_result = Some(outcome.player1_wins);
        self.player2_result = Some(outcome.player2_wins);
        self.lock_as(SessionPhase::Resolved);
        Some(outcome)
    }

    /// Lock for an externally decided outcome; false if already locked
    pub fn lock_for_resolution(&mut self, outcome: MatchOutcome) -> bool {
        if self.results_locked {
            return false;
        }
        self.player1_result = Some(outcome.player1_wins);
        self.player2_result = Some(outcome.player2_wins);
        self.lock_as(SessionPhase::Resolved);
        true
    }

    pub fn propose_cancellation(&mut self, user_id: &str) -> Result<()> {
        self.ensure_participant(user_id)?;
        self.ensure_unlocked()?;
        if let SessionPhase::CancellationPending { .. } = self.phase {
            return Err(MatchmakingError::CancellationPending {
                session_id: self.view.id.to_string(),
            }
            .into());
        }
        self.disarm_result_timer();
        self.phase = SessionPhase::CancellationPending {
            proposer: user_id.to_string(),
        };
        Ok(())
    }

    /// Only the participant who did not propose may answer
    pub fn respond_cancellation(
        &mut self,
        user_id: &str,
        accept: bool,
    ) -> Result<CancellationDecision> {
        self.ensure_participant(user_id)?;
        self.ensure_unlocked()?;
        let SessionPhase::CancellationPending { proposer } = &self.phase else {
            return Err(MatchmakingError::NoCancellationPending {
                session_id: self.view.id.to_string(),
            }
            .into());
        };
        if proposer == user_id {
            return Err(MatchmakingError::InvalidRequest {
                reason: "The proposer cannot answer their own cancellation".to_string(),
            }
            .into());
        }

        if accept {
            self.lock_as(SessionPhase::Cancelled);
            Ok(CancellationDecision::Accepted)
        } else {
            self.lock_as(SessionPhase::Disputed);
            Ok(CancellationDecision::Escalated)
        }
    }

    /// Auto-accept a pending cancellation whose deadline passed
    pub fn expire_cancellation(&mut self, epoch: u64) -> Option<UserId> {
        if self.results_locked
            || self.cancellation_timer.as_ref().map(|t| t.epoch) != Some(epoch)
        {
            return None;
        }
        self.cancellation_timer = None;
        let SessionPhase::CancellationPending { proposer } = &self.phase else {
            return None;
        };
        let proposer = proposer.clone();
        self.lock_as(SessionPhase::Cancelled);
        Some(proposer)
    }

    pub fn proposer(&self) -> Option<&UserId> {
        match &self.phase {
            SessionPhase::CancellationPending { proposer } => Some(proposer),
            _ => None,
        }
    }

    pub fn report_dispute(&mut self, user_id: &str) -> Result<()> {
        self.ensure_participant(user_id)?;
        self.ensure_unlocked()?;
        self.lock_as(SessionPhase::Disputed);
        Ok(())
    }

    pub fn cancel_by_staff(&mut self) -> Result<()> {
        self.ensure_unlocked()?;
        self.lock_as(SessionPhase::Cancelled);
        Ok(())
    }

    fn lock_as(&mut self, phase: SessionPhase) {
        self.results_locked = true;
        self.phase = phase;
        self.disarm_timers();
    }

    /// Next timer epoch; pass it to the timer task and back on firing
    pub fn next_timer_epoch(&mut self) -> u64 {
        self.timer_epoch += 1;
        self.timer_epoch
    }

    /// Store the result timer, replacing nothing if one is already armed
    pub fn arm_result_timer(&mut self, epoch: u64, handle: AbortHandle) -> bool {
        if self.result_timer.is_some() || self.results_locked {
            handle.abort();
            return false;
        }
        self.result_timer = Some(ArmedTimer { epoch, handle });
        true
    }

    pub fn arm_cancellation_timer(&mut self, epoch: u64, handle: AbortHandle) -> bool {
        if self.cancellation_timer.is_some() || self.results_locked {
            handle.abort();
            return false;
        }
        self.cancellation_timer = Some(ArmedTimer { epoch, handle });
        true
    }

    pub fn disarm_result_timer(&mut self) {
        if let Some(timer) = self.result_timer.take() {
            timer.handle.abort();
        }
    }

    pub fn disarm_timers(&mut self) {
        self.disarm_result_timer();
        if let Some(timer) = self.cancellation_timer.take() {
            timer.handle.abort();
        }
    }
}
