//! Applies confirmed match outcomes to ratings, streaks and history

use crate::error::{MatchmakingError, Result};
use crate::rating::{compute_match_deltas, RatingChange, RatingModel};
use crate::season::RosterLock;
use crate::session::{MatchOutcome, SessionView};
use crate::storage::{MatchCommit, NewMatchRecord, Storage};
use crate::types::{ClassPair, HistoryFilter, MatchHistoryRecord, User};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a committed match changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResolution {
    pub record: MatchHistoryRecord,
    /// Player1 first
    pub changes: Vec<RatingChange>,
}

pub struct HistoryRecorder {
    storage: Arc<dyn Storage>,
    model: Arc<dyn RatingModel>,
    roster: Arc<RosterLock>,
}

fn apply_result(user: &mut User, delta: f64, won: bool) {
    user.rating += delta;
    user.total_matches += 1;
    user.latest_season_matched = true;
    if won {
        user.win_count += 1;
        user.win_streak += 1;
        user.max_win_streak = user.max_win_streak.max(user.win_streak);
    } else {
        user.loss_count += 1;
        user.win_streak = 0;
    }
}

impl HistoryRecorder {
    pub fn new(
        storage: Arc<dyn Storage>,
        model: Arc<dyn RatingModel>,
        roster: Arc<RosterLock>,
    ) -> Self {
        Self {
            storage,
            model,
            roster,
        }
    }

    pub fn roster(&self) -> &RosterLock {
        &self.roster
    }

    async fn load_user(&self, user_id: &str) -> Result<User> {
        self.storage
            .find_user(user_id)
            .await?
            .ok_or_else(|| {
                MatchmakingError::UserNotFound {
                    user_id: user_id.to_string(),
                }
                .into()
            })
    }

    /// Commit the outcome of a locked session
    pub async fn commit(&self, view: &SessionView, outcome: MatchOutcome) -> Result<MatchResolution> {
        self.commit_outcome(
            &view.player1,
            &view.player2,
            [view.player1_classes, view.player2_classes],
            outcome,
        )
        .await
    }

    /// Commit a result between two users as one storage transaction
    ///
    /// Ratings are read right before the commit, so deltas always use the
    /// latest stored values. A season close waits for the commit to land.
    pub async fn commit_outcome(
        &self,
        player1: &str,
        player2: &str,
        classes: [Option<ClassPair>; 2],
        outcome: MatchOutcome,
    ) -> Result<MatchResolution> {
        if !outcome.is_valid() {
            return Err(MatchmakingError::InvalidResult {
                reason: format!(
                    "{}-{} is not a best-of-three result",
                    outcome.player1_wins, outcome.player2_wins
                ),
            }
            .into());
        }
        if player1 == player2 {
            return Err(MatchmakingError::InvalidRequest {
                reason: "A match needs two different players".to_string(),
            }
            .into());
        }

        let _roster = self.roster.shared().await;
        let mut user1 = self.load_user(player1).await?;
        let mut user2 = self.load_user(player2).await?;

        let deltas = compute_match_deltas(
            self.model.as_ref(),
            user1.rating,
            user2.rating,
            outcome.player1_wins,
            outcome.player2_wins,
        );
        let changes = vec![
            RatingChange::new(player1, user1.rating, deltas.player1),
            RatingChange::new(player2, user2.rating, deltas.player2),
        ];

        let player1_won = deltas.player1_won();
        apply_result(&mut user1, deltas.player1, player1_won);
        apply_result(&mut user2, deltas.player2, !player1_won);

        let (winner, loser) = if player1_won {
            (player1, player2)
        } else {
            (player2, player1)
        };
        let season_name = self.storage.find_open_season().await?.map(|s| s.name);

        let record = NewMatchRecord {
            player1: player1.to_string(),
            player2: player2.to_string(),
            player1_classes: classes[0],
            player2_classes: classes[1],
            player1_delta: deltas.player1,
            player2_delta: deltas.player2,
            winner: winner.to_string(),
            loser: loser.to_string(),
            season_name,
            matched_at: Utc::now(),
        };

        let record = self
            .storage
            .commit_match(MatchCommit {
                users: [user1, user2],
                record,
            })
            .await?;

        info!(
            "Match recorded - history_id: {}, winner: '{}', loser: '{}', deltas: {:+.1}/{:+.1}",
            record.id, record.winner, record.loser, deltas.player1, deltas.player2
        );
        Ok(MatchResolution { record, changes })
    }

    /// Count a mutually cancelled match against both players
    pub async fn record_cancellation(&self, view: &SessionView) -> Result<()> {
        let _roster = self.roster.shared().await;
        for user_id in view.participants() {
            let mut user = self.load_user(&user_id).await?;
            user.cancelled_matches_count += 1;
            debug!(
                "Cancellation counted - user_id: '{}', total: {}",
                user_id, user.cancelled_matches_count
            );
            self.storage.update_user(user).await?;
        }
        Ok(())
    }

    /// Match history, newest first
    pub async fn query(&self, filter: &HistoryFilter) -> Result<Vec<MatchHistoryRecord>> {
        self.storage.query_match_history(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::StandardRatingModel;
    use crate::storage::{InMemoryStorage, MockStorage};
    use crate::types::GameClass;

    async fn create_test_recorder() -> (HistoryRecorder, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        for id in ["alice", "bob"] {
            storage
                .create_user(User::new(id.into(), id.into(), format!("g-{}", id), 1500.0))
                .await
                .unwrap();
        }
        storage.create_season("S1", Utc::now()).await.unwrap();
        let recorder = HistoryRecorder::new(
            storage.clone(),
            Arc::new(StandardRatingModel::default()),
            Arc::new(RosterLock::new()),
        );
        (recorder, storage)
    }

    #[tokio::test]
    async fn test_commit_updates_both_users() {
        let (recorder, storage) = create_test_recorder().await;
        let classes = [
            Some(ClassPair::new(GameClass::Runecraft, GameClass::Havencraft).unwrap()),
            None,
        ];

        let resolution = recorder
            .commit_outcome("alice", "bob", classes, MatchOutcome::new(2, 0))
            .await
            .unwrap();

        assert_eq!(resolution.record.winner, "alice");
        assert_eq!(resolution.record.season_name.as_deref(), Some("S1"));
        assert_eq!(resolution.record.player1_classes, classes[0]);
        assert_eq!(resolution.changes[0].after, 1520.0);
        assert_eq!(resolution.changes[1].after, 1480.0);

        let alice = storage.find_user("alice").await.unwrap().unwrap();
        let bob = storage.find_user("bob").await.unwrap().unwrap();
        assert_eq!((alice.rating, alice.win_streak, alice.win_count), (1520.0, 1, 1));
        assert_eq!((bob.rating, bob.win_streak, bob.loss_count), (1480.0, 0, 1));
        assert!(alice.latest_season_matched && bob.latest_season_matched);
        assert_eq!(alice.total_matches, 1);
    }

    #[tokio::test]
    async fn test_streaks_track_maximum() {
        let (recorder, storage) = create_test_recorder().await;
        for _ in 0..3 {
            recorder
                .commit_outcome("bob", "alice", [None, None], MatchOutcome::new(2, 1))
                .await
                .unwrap();
        }
        recorder
            .commit_outcome("alice", "bob", [None, None], MatchOutcome::new(2, 0))
            .await
            .unwrap();

        let bob = storage.find_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.win_streak, 0);
        assert_eq!(bob.max_win_streak, 3);
        assert_eq!(storage.history_len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_outcome_rejected() {
        let (recorder, storage) = create_test_recorder().await;
        let err = recorder
            .commit_outcome("alice", "bob", [None, None], MatchOutcome::new(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::InvalidResult { .. })
        ));
        assert_eq!(storage.history_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_propagates() {
        let mut storage = MockStorage::new();
        storage.expect_find_user().returning(|id| {
            Ok(Some(User::new(id.to_string(), id.to_string(), id.to_string(), 1500.0)))
        });
        storage.expect_find_open_season().returning(|| Ok(None));
        storage
            .expect_commit_match()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("disk full")));
        storage.expect_update_user().never();

        let recorder = HistoryRecorder::new(
            Arc::new(storage),
            Arc::new(StandardRatingModel::default()),
            Arc::new(RosterLock::new()),
        );
        let result = recorder
            .commit_outcome("alice", "bob", [None, None], MatchOutcome::new(0, 2))
            .await;
        assert!(result.is_err());
    }
}
