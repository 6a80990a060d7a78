//! Persistent state consumed by the match engine
//!
//! The [`Storage`] trait is the seam to whatever database backs users, seasons,
//! season records and match history. Multi-row changes go through the
//! `commit_*` methods, each of which must apply entirely or not at all.

pub mod memory;

pub use memory::InMemoryStorage;

use crate::error::Result;
use crate::types::{
    ClassPair, HistoryFilter, MatchHistoryRecord, Season, SeasonId, User, UserId,
    UserSeasonRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// History row before an id is assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMatchRecord {
    pub player1: UserId,
    pub player2: UserId,
    pub player1_classes: Option<ClassPair>,
    pub player2_classes: Option<ClassPair>,
    pub player1_delta: f64,
    pub player2_delta: f64,
    pub winner: UserId,
    pub loser: UserId,
    pub season_name: Option<String>,
    pub matched_at: DateTime<Utc>,
}

/// Both participants' updated rows plus the history row for one match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCommit {
    pub users: [User; 2],
    pub record: NewMatchRecord,
}

/// Season close: end stamp, aggregated records and reset users
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonClose {
    pub season_id: SeasonId,
    pub ended_at: DateTime<Utc>,
    pub records: Vec<UserSeasonRecord>,
    pub users: Vec<User>,
}

/// Stay checkpoint: the reset user plus a record kept only if none exists yet
#[derive(Debug, Clone, PartialEq)]
pub struct StayCommit {
    pub user: User,
    pub record: UserSeasonRecord,
}

/// Storage operations used by the match engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Find a user by external id
    async fn find_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Find a user by in-game id
    async fn find_user_by_game_id(&self, game_id: &str) -> Result<Option<User>>;

    /// Insert a new user; fails if the external id or game id is taken
    async fn create_user(&self, user: User) -> Result<User>;

    /// Overwrite an existing user (last write wins)
    async fn update_user(&self, user: User) -> Result<()>;

    /// All registered users
    async fn list_users(&self) -> Result<Vec<User>>;

    /// The season with no end date, if any
    async fn find_open_season(&self) -> Result<Option<Season>>;

    /// Create a season; fails if one is already open or the name is used
    async fn create_season(&self, name: &str, start_date: DateTime<Utc>) -> Result<Season>;

    /// Close a season and apply its aggregation atomically
    async fn close_season(&self, close: SeasonClose) -> Result<Season>;

    /// Query history rows, newest first
    async fn query_match_history(&self, filter: &HistoryFilter) -> Result<Vec<MatchHistoryRecord>>;

    async fn find_user_season_record(
        &self,
        user_id: &str,
        season_id: SeasonId,
    ) -> Result<Option<UserSeasonRecord>>;

    /// Write both users and the history row as one unit
    async fn commit_match(&self, commit: MatchCommit) -> Result<MatchHistoryRecord>;

    /// Write the stayed user and insert the record if absent; returns whether it was inserted
    async fn commit_stay(&self, commit: StayCommit) -> Result<bool>;
}
