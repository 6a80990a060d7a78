//! Drives match sessions: submissions, timers, resolution and teardown
//!
//! Session locks are held only for the in-memory transition. Notices, storage
//! commits and role changes all run after the lock is released.

use crate::error::{MatchmakingError, Result};
use crate::history::{HistoryRecorder, MatchResolution};
use crate::metrics::MetricsCollector;
use crate::pool::WaitingPool;
use crate::session::registry::{lock_session, SessionRegistry, SharedSession};
use crate::session::state::{
    CancellationDecision, MatchOutcome, MatchSession, SessionView, SubmitOutcome,
};
use crate::transport::{Notice, TransportGate};
use crate::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timer and role settings used by the coordinator
#[derive(Debug, Clone)]
pub struct SessionTimings {
    pub result_timeout: Duration,
    pub cancellation_timeout: Duration,
    pub teardown_delay: Duration,
    pub in_match_role: String,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            result_timeout: Duration::from_secs(3 * 60 * 60),
            cancellation_timeout: Duration::from_secs(48 * 60 * 60),
            teardown_delay: Duration::from_secs(5),
            in_match_role: "in-match".to_string(),
        }
    }
}

/// What happened to a submitted result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmitReceipt {
    AwaitingOpponent,
    ResultsCleared,
    Resolved {
        winner: UserId,
        loser: UserId,
        history_id: u64,
    },
}

#[derive(Clone)]
pub struct SessionCoordinator {
    registry: Arc<SessionRegistry>,
    pool: WaitingPool,
    gate: Arc<TransportGate>,
    recorder: Arc<HistoryRecorder>,
    metrics: Arc<MetricsCollector>,
    timings: SessionTimings,
}

impl SessionCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        pool: WaitingPool,
        gate: Arc<TransportGate>,
        recorder: Arc<HistoryRecorder>,
        metrics: Arc<MetricsCollector>,
        timings: SessionTimings,
    ) -> Self {
        Self {
            registry,
            pool,
            gate,
            recorder,
            metrics,
            timings,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a freshly provisioned session
    pub fn open(&self, session: MatchSession) -> Result<SharedSession> {
        let shared = self.registry.insert(session)?;
        self.metrics.set_active_sessions(self.registry.len());
        Ok(shared)
    }

    /// Post a notice into the session, logging delivery failures
    async fn notify(&self, view: &SessionView, notice: Notice) {
        if let Err(e) = self.gate.send_to_session(&view.handle, &notice).await {
            warn!(
                "Session notice not delivered - session_id: {}, notice: {}, error: {}",
                view.id,
                notice.label(),
                e
            );
        }
    }

    async fn alert_staff(&self, notice: Notice) {
        if let Err(e) = self.gate.alert_staff(&notice).await {
            error!(
                "Staff alert not delivered - notice: {}, error: {}",
                notice.label(),
                e
            );
        }
    }

    fn arm_result_timer(&self, session: &mut MatchSession) {
        let epoch = session.next_timer_epoch();
        let coordinator = self.clone();
        let session_id = session.id();
        let timeout = self.timings.result_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            coordinator.on_result_timeout(session_id, epoch).await;
        });
        if !session.arm_result_timer(epoch, task.abort_handle()) {
            task.abort();
        }
    }

    fn arm_cancellation_timer(&self, session: &mut MatchSession) {
        let epoch = session.next_timer_epoch();
        let coordinator = self.clone();
        let session_id = session.id();
        let timeout = self.timings.cancellation_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            coordinator.on_cancellation_timeout(session_id, epoch).await;
        });
        if !session.arm_cancellation_timer(epoch, task.abort_handle()) {
            task.abort();
        }
    }

    /// Record one player's reported game wins
    pub async fn submit_result(
        &self,
        session_id: SessionId,
        user_id: &str,
        wins: u8,
    ) -> Result<SubmitReceipt> {
        let shared = self.registry.get(session_id)?;
        let (outcome, view) = {
            let mut session = lock_session(&shared)?;
            let outcome = session.submit_result(user_id, wins)?;
            if let SubmitOutcome::AwaitingOpponent { arm_timer: true } = outcome {
                self.arm_result_timer(&mut session);
            }
            (outcome, session.view().clone())
        };

        info!(
            "Result submitted - session_id: {}, user_id: '{}', wins: {}",
            session_id, user_id, wins
        );

        match outcome {
            SubmitOutcome::AwaitingOpponent { .. } => {
                self.notify(
                    &view,
                    Notice::ResultRecorded {
                        user_id: user_id.to_string(),
                        wins,
                    },
                )
                .await;
                Ok(SubmitReceipt::AwaitingOpponent)
            }
            SubmitOutcome::Disagreement { reported } => {
                warn!(
                    "Results disagree, both cleared - session_id: {}, reported: {}-{}",
                    session_id, reported.player1_wins, reported.player2_wins
                );
                self.metrics.record_disagreement();
                self.notify(&view, Notice::ResultsMismatch).await;
                Ok(SubmitReceipt::ResultsCleared)
            }
            SubmitOutcome::Resolved(result) => {
                let resolution = self.finish_resolution(&view, result, "agreed").await?;
                Ok(SubmitReceipt::Resolved {
                    winner: resolution.record.winner,
                    loser: resolution.record.loser,
                    history_id: resolution.record.id,
                })
            }
        }
    }

    /// Resolve with a given outcome; `None` if the session was already locked
    pub async fn resolve(
        &self,
        session_id: SessionId,
        outcome: MatchOutcome,
    ) -> Result<Option<MatchResolution>> {
        let shared = self.registry.get(session_id)?;
        let view = {
            let mut session = lock_session(&shared)?;
            if !session.lock_for_resolution(outcome) {
                return Ok(None);
            }
            session.view().clone()
        };
        self.finish_resolution(&view, outcome, "forced").await.map(Some)
    }

    /// Commit, announce and tear down; teardown runs even if the commit fails
    async fn finish_resolution(
        &self,
        view: &SessionView,
        outcome: MatchOutcome,
        kind: &str,
    ) -> Result<MatchResolution> {
        let committed = self.recorder.commit(view, outcome).await;

        match &committed {
            Ok(resolution) => {
                let deltas: Vec<f64> = resolution.changes.iter().map(|c| c.delta).collect();
                self.metrics.record_resolution(kind, &deltas);
                info!(
                    "Session resolved - session_id: {}, kind: {}, result: {}-{}",
                    view.id, kind, outcome.player1_wins, outcome.player2_wins
                );
                self.notify(
                    view,
                    Notice::MatchResolved {
                        changes: resolution.changes.clone(),
                    },
                )
                .await;
            }
            Err(e) => {
                error!(
                    "Failed to commit match result - session_id: {}, player1: '{}', player2: '{}', error: {}",
                    view.id, view.player1, view.player2, e
                );
                self.notify(
                    view,
                    Notice::SessionError {
                        message: "The result could not be recorded; staff has been notified"
                            .to_string(),
                    },
                )
                .await;
            }
        }

        self.teardown(view, true).await;
        committed
    }

    /// Fired by the result timer
    async fn on_result_timeout(&self, session_id: SessionId, epoch: u64) {
        let Ok(shared) = self.registry.get(session_id) else {
            return;
        };
        let timed_out = match lock_session(&shared) {
            Ok(mut session) => session
                .apply_timeout(epoch)
                .map(|outcome| (outcome, session.view().clone())),
            Err(e) => {
                error!("Result timeout skipped - session_id: {}, error: {}", session_id, e);
                None
            }
        };
        let Some((outcome, view)) = timed_out else {
            return;
        };

        let (winner, loser) = if outcome.player1_wins > outcome.player2_wins {
            (view.player1.clone(), view.player2.clone())
        } else {
            (view.player2.clone(), view.player1.clone())
        };
        info!(
            "Result timeout applied - session_id: {}, reporter: '{}', silent: '{}'",
            session_id, winner, loser
        );
        self.notify(&view, Notice::TimeoutDefaulted { winner, loser })
            .await;
        if let Err(e) = self.finish_resolution(&view, outcome, "timeout").await {
            debug!(
                "Timeout resolution not committed - session_id: {}, error: {}",
                session_id, e
            );
        }
    }

    /// Clear the caller's own pending result
    pub async fn withdraw_result(&self, session_id: SessionId, user_id: &str) -> Result<()> {
        let shared = self.registry.get(session_id)?;
        let view = {
            let mut session = lock_session(&shared)?;
            session.withdraw_result(user_id)?;
            session.view().clone()
        };
        info!(
            "Result withdrawn - session_id: {}, user_id: '{}'",
            session_id, user_id
        );
        self.notify(
            &view,
            Notice::ResultWithdrawn {
                user_id: user_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn request_cancellation(&self, session_id: SessionId, user_id: &str) -> Result<()> {
        let shared = self.registry.get(session_id)?;
        let view = {
            let mut session = lock_session(&shared)?;
            session.propose_cancellation(user_id)?;
            self.arm_cancellation_timer(&mut session);
            session.view().clone()
        };
        info!(
            "Cancellation proposed - session_id: {}, proposer: '{}'",
            session_id, user_id
        );
        self.notify(
            &view,
            Notice::CancellationProposed {
                proposer: user_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn respond_cancellation(
        &self,
        session_id: SessionId,
        user_id: &str,
        accept: bool,
    ) -> Result<CancellationDecision> {
        let shared = self.registry.get(session_id)?;
        let (decision, proposer, view) = {
            let mut session = lock_session(&shared)?;
            let proposer = session.proposer().cloned().unwrap_or_default();
            let decision = session.respond_cancellation(user_id, accept)?;
            (decision, proposer, session.view().clone())
        };

        match decision {
            CancellationDecision::Accepted => self.accept_cancellation(&view, "accepted").await,
            CancellationDecision::Escalated => {
                warn!(
                    "Cancellation declined, escalating - session_id: {}, proposer: '{}', responder: '{}'",
                    session_id, proposer, user_id
                );
                self.metrics.record_cancellation("escalated");
                self.alert_staff(Notice::CancellationEscalated {
                    session_id,
                    proposer,
                    responder: user_id.to_string(),
                })
                .await;
                self.teardown(&view, false).await;
            }
        }
        Ok(decision)
    }

    /// Fired by the cancellation timer
    async fn on_cancellation_timeout(&self, session_id: SessionId, epoch: u64) {
        let Ok(shared) = self.registry.get(session_id) else {
            return;
        };
        let expired = match lock_session(&shared) {
            Ok(mut session) => session
                .expire_cancellation(epoch)
                .map(|proposer| (proposer, session.view().clone())),
            Err(e) => {
                error!(
                    "Cancellation timeout skipped - session_id: {}, error: {}",
                    session_id, e
                );
                None
            }
        };
        if let Some((proposer, view)) = expired {
            info!(
                "Cancellation auto-accepted - session_id: {}, proposer: '{}'",
                session_id, proposer
            );
            self.accept_cancellation(&view, "auto_accepted").await;
        }
    }

    async fn accept_cancellation(&self, view: &SessionView, outcome: &str) {
        if let Err(e) = self.recorder.record_cancellation(view).await {
            error!(
                "Failed to count cancellation - session_id: {}, error: {}",
                view.id, e
            );
        }
        self.metrics.record_cancellation(outcome);
        info!("Session cancelled - session_id: {}, outcome: {}", view.id, outcome);
        self.notify(view, Notice::CancellationAccepted).await;
        self.teardown(view, true).await;
    }

    /// Hand the session to staff; the external session is kept for review
    pub async fn report_dispute(&self, session_id: SessionId, user_id: &str) -> Result<()> {
        let shared = self.registry.get(session_id)?;
        let view = {
            let mut session = lock_session(&shared)?;
            session.report_dispute(user_id)?;
            session.view().clone()
        };
        warn!(
            "Dispute reported - session_id: {}, reporter: '{}'",
            session_id, user_id
        );
        self.metrics.record_cancellation("dispute");
        self.alert_staff(Notice::DisputeReported {
            session_id,
            reporter: user_id.to_string(),
        })
        .await;
        self.teardown(&view, false).await;
        Ok(())
    }

    /// Staff cancellation, no rating effects
    pub async fn cancel_by_staff(&self, session_id: SessionId) -> Result<()> {
        let shared = self.registry.get(session_id)?;
        let view = {
            let mut session = lock_session(&shared)?;
            session.cancel_by_staff()?;
            session.view().clone()
        };
        info!("Session cancelled by staff - session_id: {}", session_id);
        self.metrics.record_cancellation("admin");
        self.notify(&view, Notice::CancelledByStaff).await;
        self.teardown(&view, true).await;
        Ok(())
    }

    /// Release everything the session holds
    ///
    /// Both users lose the match marker and role. The external session is
    /// deleted after the teardown delay when `delete_external` is set.
    async fn teardown(&self, view: &SessionView, delete_external: bool) {
        match self.registry.remove(view.id) {
            Ok(Some(shared)) => {
                if let Ok(mut session) = lock_session(&shared) {
                    session.disarm_timers();
                }
            }
            Ok(None) => {}
            Err(e) => error!(
                "Failed to remove session - session_id: {}, error: {}",
                view.id, e
            ),
        }
        self.metrics.set_active_sessions(self.registry.len());

        for user_id in view.participants() {
            if let Err(e) = self.pool.release_match_marker(&user_id) {
                error!(
                    "Failed to release match marker - user_id: '{}', error: {}",
                    user_id, e
                );
            }
            if let Err(e) = self
                .gate
                .revoke_role(&user_id, &self.timings.in_match_role)
                .await
            {
                warn!("Failed to revoke role - user_id: '{}', error: {}", user_id, e);
            }
        }

        if delete_external {
            let gate = self.gate.clone();
            let handle = view.handle.clone();
            let delay = self.timings.teardown_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = gate.delete_session(&handle).await {
                    error!(
                        "Failed to delete external session - handle: '{}', error: {}",
                        handle.id, e
                    );
                }
            });
        }

        info!(
            "Session torn down - session_id: {}, deleted_external: {}",
            view.id, delete_external
        );
    }

    /// Disarm every timer and forget all sessions
    pub fn shutdown(&self) -> Result<()> {
        let sessions = self.registry.drain()?;
        for shared in &sessions {
            lock_session(shared)?.disarm_timers();
        }
        self.metrics.set_active_sessions(0);
        info!("Session coordinator shut down - sessions: {}", sessions.len());
        Ok(())
    }

    /// Look up the session a user is playing in
    pub fn session_of(&self, user_id: &str) -> Result<SessionId> {
        self.registry.find_by_user(user_id)?.ok_or_else(|| {
            MatchmakingError::SessionNotFound {
                session_id: format!("(active session of {})", user_id),
            }
            .into()
        })
    }
}
