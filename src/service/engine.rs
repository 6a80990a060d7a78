//! Command-layer operations of the match engine
//!
//! [`MatchService`] owns handles to the pool, session coordinator, recorder
//! and season lifecycle. Every user and staff operation enters here.

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::history::{HistoryRecorder, MatchResolution};
use crate::metrics::MetricsCollector;
use crate::pool::WaitingPool;
use crate::season::{SeasonCloseReport, SeasonLifecycle};
use crate::session::{CancellationDecision, MatchOutcome, SessionCoordinator, SubmitReceipt};
use crate::storage::Storage;
use crate::transport::{Notice, TransportGate};
use crate::types::{
    ClassPair, GameClass, HistoryFilter, MatchHistoryRecord, RequestContext, Season, SessionId,
    User,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct MatchService {
    storage: Arc<dyn Storage>,
    pool: WaitingPool,
    coordinator: SessionCoordinator,
    recorder: Arc<HistoryRecorder>,
    seasons: Arc<SeasonLifecycle>,
    gate: Arc<TransportGate>,
    metrics: Arc<MetricsCollector>,
    settings: MatchmakingSettings,
    initial_rating: f64,
}

impl MatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        pool: WaitingPool,
        coordinator: SessionCoordinator,
        recorder: Arc<HistoryRecorder>,
        seasons: Arc<SeasonLifecycle>,
        gate: Arc<TransportGate>,
        metrics: Arc<MetricsCollector>,
        settings: MatchmakingSettings,
        initial_rating: f64,
    ) -> Self {
        Self {
            storage,
            pool,
            coordinator,
            recorder,
            seasons,
            gate,
            metrics,
            settings,
            initial_rating,
        }
    }

    pub fn pool(&self) -> &WaitingPool {
        &self.pool
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    async fn load_user(&self, user_id: &str) -> Result<User> {
        self.storage.find_user(user_id).await?.ok_or_else(|| {
            MatchmakingError::UserNotFound {
                user_id: user_id.to_string(),
            }
            .into()
        })
    }

    /// Resolve an explicit session id or fall back to the user's active session
    fn target_session(&self, session_id: Option<SessionId>, user_id: &str) -> Result<SessionId> {
        match session_id {
            Some(id) => Ok(id),
            None => self.coordinator.session_of(user_id),
        }
    }

    pub async fn register_user(
        &self,
        user_id: &str,
        display_name: &str,
        game_id: &str,
    ) -> Result<User> {
        if user_id.trim().is_empty() || game_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "User id and game id are required".to_string(),
            }
            .into());
        }
        let display_name = match display_name.trim() {
            "" => user_id,
            name => name,
        };
        let game_id = game_id.trim();
        if let Some(owner) = self.storage.find_user_by_game_id(game_id).await? {
            if owner.user_id != user_id {
                debug!(
                    "Game id already linked - game_id: '{}', owner: '{}'",
                    game_id, owner.user_id
                );
                return Err(MatchmakingError::GameIdTaken {
                    game_id: game_id.to_string(),
                }
                .into());
            }
        }

        let user = self
            .storage
            .create_user(User::new(
                user_id.to_string(),
                display_name.to_string(),
                game_id.to_string(),
                self.initial_rating,
            ))
            .await?;
        info!(
            "User registered - user_id: '{}', game_id: '{}'",
            user.user_id, user.game_id
        );
        Ok(user)
    }

    /// Replace the user's class pair; running sessions keep the captured one
    pub async fn select_classes(
        &self,
        user_id: &str,
        first: GameClass,
        second: GameClass,
    ) -> Result<User> {
        let classes = ClassPair::new(first, second)?;
        if self.pool.is_in_match(user_id)? {
            return Err(MatchmakingError::AlreadyInMatch {
                user_id: user_id.to_string(),
            }
            .into());
        }
        let _roster = self.recorder.roster().shared().await;
        let mut user = self.load_user(user_id).await?;
        user.classes = Some(classes);
        self.storage.update_user(user.clone()).await?;
        info!("Classes selected - user_id: '{}', classes: {}", user_id, classes);
        Ok(user)
    }

    /// Admit a user into the waiting pool
    ///
    /// Checked in order: registered, open season, classes selected, not in a
    /// match, not already queued.
    pub async fn request_admission(&self, context: RequestContext) -> Result<DateTime<Utc>> {
        let admitted = self.try_admit(&context).await;
        match &admitted {
            Ok(_) => self.metrics.record_admission("admitted"),
            Err(e) => {
                let status = match e.downcast_ref::<MatchmakingError>() {
                    Some(MatchmakingError::AlreadyQueued { .. }) => "already_queued",
                    Some(MatchmakingError::AlreadyInMatch { .. }) => "already_in_match",
                    Some(MatchmakingError::NoOpenSeason) => "no_open_season",
                    _ => "rejected",
                };
                self.metrics.record_admission(status);
            }
        }
        self.metrics.set_players_waiting(self.pool.len());
        admitted
    }

    async fn try_admit(&self, context: &RequestContext) -> Result<DateTime<Utc>> {
        let user = self.load_user(&context.user_id).await?;
        if self.storage.find_open_season().await?.is_none() {
            return Err(MatchmakingError::NoOpenSeason.into());
        }
        if user.classes.is_none() {
            return Err(MatchmakingError::InvalidClassSelection {
                reason: "Select two classes before queueing".to_string(),
            }
            .into());
        }

        let enqueued_at = self.pool.enqueue(context.clone(), user.rating)?;
        if let Err(e) = self
            .gate
            .send_ephemeral_reply(context, &Notice::Queued { rating: user.rating })
            .await
        {
            warn!(
                "Queue confirmation not delivered - user_id: '{}', error: {}",
                context.user_id, e
            );
        }
        Ok(enqueued_at)
    }

    /// Leave the pool; `false` if the user was not waiting
    pub async fn leave_queue(&self, user_id: &str) -> Result<bool> {
        let removed = self.pool.dequeue_if_present(user_id)?.is_some();
        if removed {
            info!("User left the queue - user_id: '{}'", user_id);
        }
        self.metrics.set_players_waiting(self.pool.len());
        Ok(removed)
    }

    pub async fn report_result(
        &self,
        session_id: Option<SessionId>,
        user_id: &str,
        wins: u8,
    ) -> Result<SubmitReceipt> {
        let session_id = self.target_session(session_id, user_id)?;
        self.coordinator.submit_result(session_id, user_id, wins).await
    }

    pub async fn withdraw_result(&self, session_id: Option<SessionId>, user_id: &str) -> Result<()> {
        let session_id = self.target_session(session_id, user_id)?;
        self.coordinator.withdraw_result(session_id, user_id).await
    }

    pub async fn request_cancellation(
        &self,
        session_id: Option<SessionId>,
        user_id: &str,
    ) -> Result<()> {
        let session_id = self.target_session(session_id, user_id)?;
        self.coordinator.request_cancellation(session_id, user_id).await
    }

    pub async fn respond_cancellation(
        &self,
        session_id: Option<SessionId>,
        user_id: &str,
        accept: bool,
    ) -> Result<CancellationDecision> {
        let session_id = self.target_session(session_id, user_id)?;
        self.coordinator
            .respond_cancellation(session_id, user_id, accept)
            .await
    }

    pub async fn report_dispute(&self, session_id: Option<SessionId>, user_id: &str) -> Result<()> {
        let session_id = self.target_session(session_id, user_id)?;
        self.coordinator.report_dispute(session_id, user_id).await
    }

    /// Mid-season checkpoint; not allowed while waiting or playing
    pub async fn stay(&self, user_id: &str) -> Result<User> {
        if self.pool.is_in_match(user_id)? {
            return Err(MatchmakingError::AlreadyInMatch {
                user_id: user_id.to_string(),
            }
            .into());
        }
        if self.pool.is_queued(user_id)? {
            return Err(MatchmakingError::AlreadyQueued {
                user_id: user_id.to_string(),
            }
            .into());
        }
        self.seasons.stay(user_id).await
    }

    pub async fn query_match_history(&self, filter: &HistoryFilter) -> Result<Vec<MatchHistoryRecord>> {
        self.recorder.query(filter).await
    }

    /// Record a result directly, outside any session
    ///
    /// One side must have 2 wins and the other 0 or 1.
    pub async fn admin_set_result(
        &self,
        player1: &str,
        player1_wins: u8,
        player2: &str,
        player2_wins: u8,
    ) -> Result<MatchResolution> {
        let outcome = MatchOutcome::new(player1_wins, player2_wins);
        if !outcome.is_valid() {
            return Err(MatchmakingError::InvalidResult {
                reason: format!(
                    "{}-{} is not a best-of-three result",
                    player1_wins, player2_wins
                ),
            }
            .into());
        }
        let user1 = self.load_user(player1).await?;
        let user2 = self.load_user(player2).await?;

        let resolution = self
            .recorder
            .commit_outcome(player1, player2, [user1.classes, user2.classes], outcome)
            .await?;
        self.metrics.record_resolution(
            "admin",
            &resolution.changes.iter().map(|c| c.delta).collect::<Vec<_>>(),
        );

        for user_id in [player1, player2] {
            if let Err(e) = self
                .gate
                .revoke_role(&user_id.to_string(), &self.settings.in_match_role)
                .await
            {
                warn!("Failed to revoke role - user_id: '{}', error: {}", user_id, e);
            }
        }

        info!(
            "Result set by staff - player1: '{}', player2: '{}', result: {}-{}, history_id: {}",
            player1, player2, player1_wins, player2_wins, resolution.record.id
        );
        Ok(resolution)
    }

    pub async fn admin_open_season(&self, name: &str) -> Result<Season> {
        self.seasons.open_season(name).await
    }

    pub async fn admin_close_season(&self) -> Result<SeasonCloseReport> {
        self.seasons.close_season().await
    }

    pub async fn admin_cancel_session(&self, session_id: SessionId) -> Result<()> {
        self.coordinator.cancel_by_staff(session_id).await
    }

    /// Apply a trust delta; staff is alerted when the result drops below the review threshold
    pub async fn admin_adjust_trust(&self, user_id: &str, delta: i32) -> Result<User> {
        let user = {
            let _roster = self.recorder.roster().shared().await;
            let mut user = self.load_user(user_id).await?;
            user.trust_points = user.trust_points.saturating_add(delta);
            self.storage.update_user(user.clone()).await?;
            user
        };
        info!(
            "Trust adjusted - user_id: '{}', delta: {:+}, trust_points: {}",
            user_id, delta, user.trust_points
        );

        if user.trust_points < self.settings.trust_review_threshold {
            warn!(
                "Trust below review threshold - user_id: '{}', trust_points: {}",
                user_id, user.trust_points
            );
            let notice = Notice::TrustReviewNeeded {
                user_id: user_id.to_string(),
                trust_points: user.trust_points,
            };
            if let Err(e) = self.gate.alert_staff(&notice).await {
                warn!("Trust review alert not delivered - user_id: '{}', error: {}", user_id, e);
            }
        }
        Ok(user)
    }

    /// Move one recorded result from `loser` to `winner`
    ///
    /// `winner` gains a win and drops a loss, `loser` the reverse. Requires
    /// `winner` to have a loss and `loser` to have a win.
    pub async fn admin_adjust_win_loss(&self, winner: &str, loser: &str) -> Result<[User; 2]> {
        if winner == loser {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Win/loss adjustment needs two different users".to_string(),
            }
            .into());
        }
        let _roster = self.recorder.roster().shared().await;
        let mut first = self.load_user(winner).await?;
        let mut second = self.load_user(loser).await?;
        if first.loss_count == 0 || second.win_count == 0 {
            return Err(MatchmakingError::InvalidRequest {
                reason: format!(
                    "'{}' has no loss or '{}' has no win to move",
                    winner, loser
                ),
            }
            .into());
        }

        first.win_count += 1;
        first.loss_count -= 1;
        second.win_count -= 1;
        second.loss_count += 1;
        self.storage.update_user(first.clone()).await?;
        self.storage.update_user(second.clone()).await?;

        info!(
            "Win/loss adjusted - winner: '{}' ({}-{}), loser: '{}' ({}-{})",
            winner, first.win_count, first.loss_count, loser, second.win_count, second.loss_count
        );
        Ok([first, second])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSettings;
    use crate::error::{classify, ErrorKind};
    use crate::rating::StandardRatingModel;
    use crate::season::RosterLock;
    use crate::session::{SessionRegistry, SessionTimings};
    use crate::storage::InMemoryStorage;
    use crate::transport::MockTransport;
    use std::time::Duration;

    struct Harness {
        service: MatchService,
        storage: Arc<InMemoryStorage>,
        transport: Arc<MockTransport>,
    }

    fn create_test_service() -> Harness {
        let storage = Arc::new(InMemoryStorage::new());
        let transport = Arc::new(MockTransport::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let gate = Arc::new(TransportGate::new(
            transport.clone(),
            TransportSettings::default(),
            metrics.clone(),
        ));
        let pool = WaitingPool::new(gate.clone(), metrics.clone(), Duration::from_secs(60));
        let roster = Arc::new(RosterLock::new());
        let recorder = Arc::new(HistoryRecorder::new(
            storage.clone(),
            Arc::new(StandardRatingModel::default()),
            roster.clone(),
        ));
        let coordinator = SessionCoordinator::new(
            Arc::new(SessionRegistry::new()),
            pool.clone(),
            gate.clone(),
            recorder.clone(),
            metrics.clone(),
            SessionTimings::default(),
        );
        let seasons = Arc::new(SeasonLifecycle::new(storage.clone(), roster, 1500.0, 100));
        let service = MatchService::new(
            storage.clone(),
            pool,
            coordinator,
            recorder,
            seasons,
            gate,
            metrics,
            MatchmakingSettings::default(),
            1500.0,
        );
        Harness {
            service,
            storage,
            transport,
        }
    }

    fn rejection(err: &anyhow::Error) -> Option<&MatchmakingError> {
        err.downcast_ref::<MatchmakingError>()
    }

    #[tokio::test]
    async fn test_admission_checks_in_order() {
        let harness = create_test_service();
        let service = &harness.service;

        let err = service.request_admission(RequestContext::new("alice")).await.unwrap_err();
        assert!(matches!(rejection(&err), Some(MatchmakingError::UserNotFound { .. })));

        service.register_user("alice", "Alice", "g-alice").await.unwrap();
        let err = service.request_admission(RequestContext::new("alice")).await.unwrap_err();
        assert!(matches!(rejection(&err), Some(MatchmakingError::NoOpenSeason)));

        service.admin_open_season("Spring").await.unwrap();
        let err = service.request_admission(RequestContext::new("alice")).await.unwrap_err();
        assert!(matches!(
            rejection(&err),
            Some(MatchmakingError::InvalidClassSelection { .. })
        ));

        service
            .select_classes("alice", GameClass::Forestcraft, GameClass::Portalcraft)
            .await
            .unwrap();
        service.request_admission(RequestContext::new("alice")).await.unwrap();
        assert!(matches!(
            harness.transport.replies_to("alice").as_slice(),
            [Notice::Queued { rating }] if *rating == 1500.0
        ));

        let err = service.request_admission(RequestContext::new("alice")).await.unwrap_err();
        assert!(matches!(rejection(&err), Some(MatchmakingError::AlreadyQueued { .. })));

        assert!(service.leave_queue("alice").await.unwrap());
        assert!(!service.leave_queue("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_conflicts() {
        let harness = create_test_service();
        let service = &harness.service;
        service.register_user("alice", "Alice", "g-alice").await.unwrap();

        let err = service.register_user("alice", "Alice", "g-alice").await.unwrap_err();
        assert!(matches!(rejection(&err), Some(MatchmakingError::AlreadyRegistered { .. })));

        let err = service.register_user("bob", "Bob", " g-alice ").await.unwrap_err();
        assert!(matches!(rejection(&err), Some(MatchmakingError::GameIdTaken { .. })));
        assert_eq!(classify(&err), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_select_same_class_twice() {
        let harness = create_test_service();
        harness.service.register_user("alice", "", "g-alice").await.unwrap();

        let err = harness
            .service
            .select_classes("alice", GameClass::Havencraft, GameClass::Havencraft)
            .await
            .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_admin_set_result() {
        let harness = create_test_service();
        let service = &harness.service;
        service.admin_open_season("Spring").await.unwrap();
        service.register_user("alice", "Alice", "g-alice").await.unwrap();
        service.register_user("bob", "Bob", "g-bob").await.unwrap();

        let err = service.admin_set_result("alice", 1, "bob", 1).await.unwrap_err();
        assert!(matches!(rejection(&err), Some(MatchmakingError::InvalidResult { .. })));

        let resolution = service.admin_set_result("alice", 1, "bob", 2).await.unwrap();
        assert_eq!(resolution.record.winner, "bob");
        assert_eq!(resolution.record.season_name.as_deref(), Some("Spring"));

        let bob = harness.storage.find_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.rating, 1520.0);
        assert!(bob.latest_season_matched);
    }

    #[tokio::test]
    async fn test_trust_alert_below_threshold() {
        let harness = create_test_service();
        harness.service.register_user("alice", "Alice", "g-alice").await.unwrap();

        let user = harness.service.admin_adjust_trust("alice", -30).await.unwrap();
        assert_eq!(user.trust_points, 70);
        assert!(harness.transport.staff_alerts().is_empty());

        let user = harness.service.admin_adjust_trust("alice", -15).await.unwrap();
        assert_eq!(user.trust_points, 55);
        assert!(matches!(
            harness.transport.staff_alerts().as_slice(),
            [Notice::TrustReviewNeeded { trust_points: 55, .. }]
        ));
    }

    #[tokio::test]
    async fn test_adjust_win_loss() {
        let harness = create_test_service();
        let service = &harness.service;
        service.register_user("alice", "Alice", "g-alice").await.unwrap();
        service.register_user("bob", "Bob", "g-bob").await.unwrap();

        let err = service.admin_adjust_win_loss("alice", "bob").await.unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Validation);

        service.admin_open_season("Spring").await.unwrap();
        service.admin_set_result("alice", 0, "bob", 2).await.unwrap();

        let [alice, bob] = service.admin_adjust_win_loss("alice", "bob").await.unwrap();
        assert_eq!((alice.win_count, alice.loss_count), (1, 0));
        assert_eq!((bob.win_count, bob.loss_count), (0, 1));
    }

    #[tokio::test]
    async fn test_stay_rejected_while_queued() {
        let harness = create_test_service();
        let service = &harness.service;
        service.admin_open_season("Spring").await.unwrap();
        service.register_user("alice", "Alice", "g-alice").await.unwrap();
        service
            .select_classes("alice", GameClass::Shadowcraft, GameClass::Bloodcraft)
            .await
            .unwrap();
        service.request_admission(RequestContext::new("alice")).await.unwrap();

        let err = service.stay("alice").await.unwrap_err();
        assert!(matches!(rejection(&err), Some(MatchmakingError::AlreadyQueued { .. })));

        service.leave_queue("alice").await.unwrap();
        let user = service.stay("alice").await.unwrap();
        assert!(user.stay_flag);
    }

    #[tokio::test]
    async fn test_report_without_session() {
        let harness = create_test_service();
        let err = harness.service.report_result(None, "alice", 2).await.unwrap_err();
        assert_eq!(classify(&err), ErrorKind::NotFound);
    }
}
