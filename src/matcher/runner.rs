//! Periodic matcher tick and match session provisioning

use crate::error::{MatchmakingError, Result};
use crate::matcher::algorithm::{find_pairs, OpponentMemory};
use crate::metrics::MetricsCollector;
use crate::pool::{WaitingEntry, WaitingPool};
use crate::session::{MatchSession, SessionCoordinator, SessionView};
use crate::storage::Storage;
use crate::transport::{Notice, PlayerCard, SessionHandle, TransportGate};
use crate::types::{SessionId, User};
use crate::utils::{generate_session_id, session_display_name};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Matcher {
    pool: WaitingPool,
    coordinator: SessionCoordinator,
    storage: Arc<dyn Storage>,
    gate: Arc<TransportGate>,
    metrics: Arc<MetricsCollector>,
    memory: Arc<Mutex<OpponentMemory>>,
    max_rating_difference: f64,
    in_match_role: String,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pairs_found: usize,
    pub sessions_opened: usize,
    pub failures: usize,
}

impl Matcher {
    pub fn new(
        pool: WaitingPool,
        coordinator: SessionCoordinator,
        storage: Arc<dyn Storage>,
        gate: Arc<TransportGate>,
        metrics: Arc<MetricsCollector>,
        max_rating_difference: f64,
        in_match_role: String,
    ) -> Self {
        Self {
            pool,
            coordinator,
            storage,
            gate,
            metrics,
            memory: Arc::new(Mutex::new(OpponentMemory::new())),
            max_rating_difference,
            in_match_role,
        }
    }

    /// The user's last paired opponent
    pub fn last_opponent(&self, user_id: &str) -> Option<String> {
        self.memory
            .lock()
            .ok()
            .and_then(|memory| memory.last_opponent(user_id).cloned())
    }

    /// Pair what the pool holds right now and provision every pairing
    ///
    /// A failing pairing never stops the others.
    pub async fn tick(&self) -> Result<TickReport> {
        let snapshot = self.pool.snapshot()?;
        if snapshot.len() < 2 {
            return Ok(TickReport::default());
        }
        if self.storage.find_open_season().await?.is_none() {
            debug!("No open season, pairing skipped - waiting: {}", snapshot.len());
            return Ok(TickReport::default());
        }

        let consumed = {
            let mut memory = self.memory.lock().map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire opponent memory lock".to_string(),
            })?;
            let pairs = find_pairs(&snapshot, &memory, self.max_rating_difference);

            let mut consumed = Vec::with_capacity(pairs.len());
            for (i, j) in pairs {
                let (a, b) = (&snapshot[i], &snapshot[j]);
                match self.pool.take_pair(&a.user_id, &b.user_id)? {
                    Some(pair) => {
                        memory.record(&a.user_id, &b.user_id);
                        consumed.push(pair);
                    }
                    None => debug!(
                        "Pair skipped, user left the pool - users: '{}', '{}'",
                        a.user_id, b.user_id
                    ),
                }
            }
            consumed
        };

        let mut report = TickReport {
            pairs_found: consumed.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for (first, second) in consumed {
            info!(
                "Pair found - player1: '{}' ({:.1}), player2: '{}' ({:.1})",
                first.user_id, first.rating, second.user_id, second.rating
            );
            self.metrics
                .record_match_created(&[first.waited(), second.waited()]);
            let matcher = self.clone();
            tasks.spawn(async move { matcher.provision(first, second).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => report.sessions_opened += 1,
                Ok(Err(_)) => report.failures += 1,
                Err(e) => {
                    error!("Provisioning task panicked: {}", e);
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Set up the external session; undo the pairing if that fails
    async fn provision(&self, first: WaitingEntry, second: WaitingEntry) -> Result<SessionId> {
        match self.open_session(&first, &second).await {
            Ok(session_id) => Ok(session_id),
            Err(e) => {
                error!(
                    "Match session setup failed - player1: '{}', player2: '{}', error: {}",
                    first.user_id, second.user_id, e
                );
                self.abandon_pairing(&first, &second).await;
                Err(e)
            }
        }
    }

    async fn load_user(&self, user_id: &str) -> Result<User> {
        self.storage.find_user(user_id).await?.ok_or_else(|| {
            MatchmakingError::UserNotFound {
                user_id: user_id.to_string(),
            }
            .into()
        })
    }

    async fn open_session(&self, first: &WaitingEntry, second: &WaitingEntry) -> Result<SessionId> {
        let user1 = self.load_user(&first.user_id).await?;
        let user2 = self.load_user(&second.user_id).await?;

        let name = session_display_name(&user1.user_id, &user2.user_id);
        let participants = [user1.user_id.clone(), user2.user_id.clone()];
        let handle = self
            .gate
            .create_isolated_session(&name, &participants)
            .await?;

        if let Err(e) = self.grant_roles(&participants).await {
            self.discard_handle(&handle).await;
            return Err(e);
        }

        for (entry, opponent) in [(first, &user2), (second, &user1)] {
            let notice = Notice::MatchFound {
                session_name: name.clone(),
                opponent: opponent.user_id.clone(),
            };
            if let Err(e) = self.gate.send_ephemeral_reply(&entry.context, &notice).await {
                warn!(
                    "Match notice not delivered - user_id: '{}', error: {}",
                    entry.user_id, e
                );
            }
        }

        // Classes are captured now; later selection changes do not affect this match
        let view = SessionView {
            id: generate_session_id(),
            player1: user1.user_id.clone(),
            player2: user2.user_id.clone(),
            player1_classes: user1.classes,
            player2_classes: user2.classes,
            handle: handle.clone(),
            created_at: Utc::now(),
        };
        let session_id = view.id;
        if let Err(e) = self.coordinator.open(MatchSession::new(view)) {
            self.discard_handle(&handle).await;
            return Err(e);
        }

        let ready = Notice::MatchReady {
            session_id,
            players: [&user1, &user2]
                .into_iter()
                .map(|user| PlayerCard {
                    user_id: user.user_id.clone(),
                    display_name: user.display_name.clone(),
                    rating: user.rating,
                    trust_points: user.trust_points,
                    classes: user.classes,
                })
                .collect(),
        };
        if let Err(e) = self.gate.send_to_session(&handle, &ready).await {
            warn!(
                "Opening message not delivered - session_id: {}, error: {}",
                session_id, e
            );
        }

        info!(
            "Match session opened - session_id: {}, name: '{}', handle: '{}'",
            session_id, name, handle.id
        );
        Ok(session_id)
    }

    async fn grant_roles(&self, participants: &[String; 2]) -> Result<()> {
        for user_id in participants {
            self.gate.grant_role(user_id, &self.in_match_role).await?;
        }
        Ok(())
    }

    async fn discard_handle(&self, handle: &SessionHandle) {
        if let Err(e) = self.gate.delete_session(handle).await {
            warn!(
                "Failed to discard external session - handle: '{}', error: {}",
                handle.id, e
            );
        }
    }

    /// Tell both users setup failed and let them queue again
    async fn abandon_pairing(&self, first: &WaitingEntry, second: &WaitingEntry) {
        let notice = Notice::SessionError {
            message: "Match setup failed, please queue again".to_string(),
        };
        for entry in [first, second] {
            if let Err(e) = self.pool.release_match_marker(&entry.user_id) {
                error!(
                    "Failed to release match marker - user_id: '{}', error: {}",
                    entry.user_id, e
                );
            }
            if let Err(e) = self.gate.revoke_role(&entry.user_id, &self.in_match_role).await {
                warn!("Failed to revoke role - user_id: '{}', error: {}", entry.user_id, e);
            }
            if let Err(e) = self.gate.send_ephemeral_reply(&entry.context, &notice).await {
                warn!(
                    "Setup failure notice not delivered - user_id: '{}', error: {}",
                    entry.user_id, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSettings;
    use crate::history::HistoryRecorder;
    use crate::rating::StandardRatingModel;
    use crate::season::RosterLock;
    use crate::session::{SessionRegistry, SessionTimings};
    use crate::storage::InMemoryStorage;
    use crate::transport::{MockTransport, TransportError};
    use crate::types::{ClassPair, GameClass, RequestContext};
    use std::time::Duration;

    struct Harness {
        matcher: Matcher,
        pool: WaitingPool,
        coordinator: SessionCoordinator,
        storage: Arc<InMemoryStorage>,
        transport: Arc<MockTransport>,
    }

    async fn create_test_harness() -> Harness {
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_season("S1", Utc::now()).await.unwrap();
        let transport = Arc::new(MockTransport::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let gate = Arc::new(TransportGate::new(
            transport.clone(),
            TransportSettings::default(),
            metrics.clone(),
        ));
        let pool = WaitingPool::new(gate.clone(), metrics.clone(), Duration::from_secs(60));
        let recorder = Arc::new(HistoryRecorder::new(
            storage.clone(),
            Arc::new(StandardRatingModel::default()),
            Arc::new(RosterLock::new()),
        ));
        let coordinator = SessionCoordinator::new(
            Arc::new(SessionRegistry::new()),
            pool.clone(),
            gate.clone(),
            recorder,
            metrics.clone(),
            SessionTimings::default(),
        );
        let matcher = Matcher::new(
            pool.clone(),
            coordinator.clone(),
            storage.clone(),
            gate,
            metrics,
            300.0,
            "in-match".to_string(),
        );
        Harness {
            matcher,
            pool,
            coordinator,
            storage,
            transport,
        }
    }

    async fn add_waiting_user(harness: &Harness, id: &str, rating: f64) {
        let mut user = User::new(id.into(), id.to_uppercase(), format!("g-{}", id), rating);
        user.classes = Some(ClassPair::new(GameClass::Swordcraft, GameClass::Runecraft).unwrap());
        harness.storage.create_user(user).await.unwrap();
        harness.pool.enqueue(RequestContext::new(id), rating).unwrap();
    }

    #[tokio::test]
    async fn test_no_pairing_without_open_season() {
        let harness = create_test_harness().await;
        add_waiting_user(&harness, "alice", 1500.0).await;
        add_waiting_user(&harness, "bob", 1500.0).await;
        let season = harness.storage.find_open_season().await.unwrap().unwrap();
        harness
            .storage
            .close_season(crate::storage::SeasonClose {
                season_id: season.id,
                ended_at: Utc::now(),
                records: Vec::new(),
                users: Vec::new(),
            })
            .await
            .unwrap();

        let report = harness.matcher.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(harness.pool.len(), 2);
    }

    #[tokio::test]
    async fn test_tick_opens_session() {
        let harness = create_test_harness().await;
        add_waiting_user(&harness, "alice", 1500.0).await;
        add_waiting_user(&harness, "bob", 1500.0).await;

        let report = harness.matcher.tick().await.unwrap();
        assert_eq!(report.sessions_opened, 1);
        assert!(harness.pool.is_empty());
        assert!(harness.transport.has_role("alice", "in-match"));
        assert_eq!(
            harness.transport.created_sessions()[0].name,
            "alice_vs_bob"
        );
        assert!(matches!(
            harness.transport.replies_to("bob").as_slice(),
            [Notice::MatchFound { opponent, .. }] if opponent == "alice"
        ));
        assert!(matches!(
            harness.transport.session_notices().as_slice(),
            [Notice::MatchReady { players, .. }] if players.len() == 2
        ));
        assert!(harness.coordinator.session_of("alice").is_ok());
        assert_eq!(harness.matcher.last_opponent("bob").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_rematch_blocked_while_alternative_exists() {
        let harness = create_test_harness().await;
        add_waiting_user(&harness, "alice", 1500.0).await;
        add_waiting_user(&harness, "bob", 1500.0).await;
        harness.matcher.tick().await.unwrap();

        let session_id = harness.coordinator.session_of("alice").unwrap();
        harness.coordinator.cancel_by_staff(session_id).await.unwrap();

        harness.pool.enqueue(RequestContext::new("alice"), 1500.0).unwrap();
        harness.pool.enqueue(RequestContext::new("bob"), 1500.0).unwrap();
        add_waiting_user(&harness, "carol", 1550.0).await;

        let report = harness.matcher.tick().await.unwrap();
        assert_eq!(report.sessions_opened, 1);
        assert_eq!(harness.matcher.last_opponent("carol").as_deref(), Some("alice"));
        assert!(harness.pool.is_queued("bob").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_releases_users() {
        let harness = create_test_harness().await;
        add_waiting_user(&harness, "alice", 1500.0).await;
        add_waiting_user(&harness, "bob", 1500.0).await;
        harness.transport.fail_next(
            "create_isolated_session",
            (0..5)
                .map(|_| TransportError::RateLimited { retry_after: None })
                .collect(),
        );

        let report = harness.matcher.tick().await.unwrap();
        assert_eq!(report.failures, 1);
        assert!(!harness.pool.is_in_match("alice").unwrap());
        assert!(harness.coordinator.registry().is_empty());
        assert!(matches!(
            harness.transport.replies_to("alice").as_slice(),
            [Notice::SessionError { .. }]
        ));

        // Released users can queue again
        harness.pool.enqueue(RequestContext::new("alice"), 1500.0).unwrap();
    }

    #[tokio::test]
    async fn test_failed_pair_does_not_block_others() {
        let harness = create_test_harness().await;
        add_waiting_user(&harness, "alice", 1500.0).await;
        // bob is queued but has no stored profile
        harness.pool.enqueue(RequestContext::new("bob"), 1510.0).unwrap();
        add_waiting_user(&harness, "carol", 2000.0).await;
        add_waiting_user(&harness, "dave", 2010.0).await;

        let report = harness.matcher.tick().await.unwrap();
        assert_eq!(report.pairs_found, 2);
        assert_eq!(report.sessions_opened, 1);
        assert_eq!(report.failures, 1);
        assert!(harness.coordinator.session_of("carol").is_ok());
        assert!(!harness.pool.is_in_match("alice").unwrap());
    }
}
