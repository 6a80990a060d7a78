//! In-memory storage implementation
//!
//! All tables live behind one lock so every `commit_*` call is applied as a
//! single unit.

use crate::error::{MatchmakingError, Result};
use crate::storage::{MatchCommit, NewMatchRecord, SeasonClose, StayCommit, Storage};
use crate::types::{
    HistoryFilter, HistoryId, MatchHistoryRecord, Season, SeasonId, User, UserId,
    UserSeasonRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct StorageState {
    users: HashMap<UserId, User>,
    seasons: Vec<Season>,
    season_records: HashMap<(UserId, SeasonId), UserSeasonRecord>,
    history: Vec<MatchHistoryRecord>,
    next_history_id: HistoryId,
    next_season_id: SeasonId,
}

impl StorageState {
    fn open_season(&self) -> Option<&Season> {
        self.seasons.iter().find(|season| season.is_open())
    }

    fn push_history(&mut self, record: NewMatchRecord) -> MatchHistoryRecord {
        self.next_history_id += 1;
        let stored = MatchHistoryRecord {
            id: self.next_history_id,
            player1: record.player1,
            player2: record.player2,
            player1_classes: record.player1_classes,
            player2_classes: record.player2_classes,
            player1_delta: record.player1_delta,
            player2_delta: record.player2_delta,
            winner: record.winner,
            loser: record.loser,
            season_name: record.season_name,
            matched_at: record.matched_at,
        };
        self.history.push(stored.clone());
        stored
    }

    fn require_user(&self, user_id: &str) -> Result<()> {
        if self.users.contains_key(user_id) {
            Ok(())
        } else {
            Err(MatchmakingError::UserNotFound {
                user_id: user_id.to_string(),
            }
            .into())
        }
    }
}

/// Storage backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: RwLock<StorageState>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StorageState>> {
        self.state.read().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire storage read lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StorageState>> {
        self.state.write().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire storage write lock".to_string(),
            }
            .into()
        })
    }

    /// Number of stored history rows
    pub fn history_len(&self) -> usize {
        self.read().map(|state| state.history.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.read()?.users.get(user_id).cloned())
    }

    async fn find_user_by_game_id(&self, game_id: &str) -> Result<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|user| user.game_id == game_id)
            .cloned())
    }

    async fn create_user(&self, user: User) -> Result<User> {
        let mut state = self.write()?;
        if state.users.contains_key(&user.user_id) {
            return Err(MatchmakingError::AlreadyRegistered {
                user_id: user.user_id,
            }
            .into());
        }
        if state.users.values().any(|u| u.game_id == user.game_id) {
            return Err(MatchmakingError::GameIdTaken {
                game_id: user.game_id,
            }
            .into());
        }
        state.users.insert(user.user_id.clone(), user.clone());
        debug!("Created user '{}'", user.user_id);
        Ok(user)
    }

    async fn update_user(&self, user: User) -> Result<()> {
        let mut state = self.write()?;
        state.require_user(&user.user_id)?;
        state.users.insert(user.user_id.clone(), user);
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.read()?.users.values().cloned().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(users)
    }

    async fn find_open_season(&self) -> Result<Option<Season>> {
        Ok(self.read()?.open_season().cloned())
    }

    async fn create_season(&self, name: &str, start_date: DateTime<Utc>) -> Result<Season> {
        let mut state = self.write()?;
        if let Some(open) = state.open_season() {
            return Err(MatchmakingError::SeasonAlreadyOpen {
                name: open.name.clone(),
            }
            .into());
        }
        if state.seasons.iter().any(|season| season.name == name) {
            return Err(MatchmakingError::InvalidRequest {
                reason: format!("Season name already used: {}", name),
            }
            .into());
        }

        state.next_season_id += 1;
        let season = Season {
            id: state.next_season_id,
            name: name.to_string(),
            start_date,
            end_date: None,
        };
        state.seasons.push(season.clone());
        Ok(season)
    }

    async fn close_season(&self, close: SeasonClose) -> Result<Season> {
        let mut state = self.write()?;

        let index = state
            .seasons
            .iter()
            .position(|season| season.id == close.season_id)
            .ok_or_else(|| MatchmakingError::SeasonNotFound {
                season: close.season_id.to_string(),
            })?;
        if !state.seasons[index].is_open() {
            return Err(MatchmakingError::NoOpenSeason.into());
        }
        for user in &close.users {
            state.require_user(&user.user_id)?;
        }

        state.seasons[index].end_date = Some(close.ended_at);
        for record in close.records {
            state
                .season_records
                .insert((record.user_id.clone(), record.season_id), record);
        }
        for user in close.users {
            state.users.insert(user.user_id.clone(), user);
        }

        Ok(state.seasons[index].clone())
    }

    async fn query_match_history(&self, filter: &HistoryFilter) -> Result<Vec<MatchHistoryRecord>> {
        let state = self.read()?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_user_season_record(
        &self,
        user_id: &str,
        season_id: SeasonId,
    ) -> Result<Option<UserSeasonRecord>> {
        Ok(self
            .read()?
            .season_records
            .get(&(user_id.to_string(), season_id))
            .cloned())
    }

    async fn commit_match(&self, commit: MatchCommit) -> Result<MatchHistoryRecord> {
        let mut state = self.write()?;
        for user in &commit.users {
            state.require_user(&user.user_id)?;
        }

        let [first, second] = commit.users;
        state.users.insert(first.user_id.clone(), first);
        state.users.insert(second.user_id.clone(), second);
        Ok(state.push_history(commit.record))
    }

    async fn commit_stay(&self, commit: StayCommit) -> Result<bool> {
        let mut state = self.write()?;
        state.require_user(&commit.user.user_id)?;

        let key = (commit.record.user_id.clone(), commit.record.season_id);
        let inserted = !state.season_records.contains_key(&key);
        if inserted {
            state.season_records.insert(key, commit.record);
        }
        state.users.insert(commit.user.user_id.clone(), commit.user);
        Ok(inserted)
    }
}
