//! Common types used throughout the matchmaking service

use crate::error::MatchmakingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// External identity of a user (chat platform id)
pub type UserId = String;

/// Unique identifier for match sessions
pub type SessionId = Uuid;

/// Identifier for seasons
pub type SeasonId = u64;

/// Identifier for match history rows
pub type HistoryId = u64;

/// Playable classes; a user picks exactly two distinct ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GameClass {
    Forestcraft,
    Swordcraft,
    Runecraft,
    Dragoncraft,
    Shadowcraft,
    Bloodcraft,
    Havencraft,
    Portalcraft,
}

impl GameClass {
    pub const ALL: [GameClass; 8] = [
        GameClass::Forestcraft,
        GameClass::Swordcraft,
        GameClass::Runecraft,
        GameClass::Dragoncraft,
        GameClass::Shadowcraft,
        GameClass::Bloodcraft,
        GameClass::Havencraft,
        GameClass::Portalcraft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameClass::Forestcraft => "Forestcraft",
            GameClass::Swordcraft => "Swordcraft",
            GameClass::Runecraft => "Runecraft",
            GameClass::Dragoncraft => "Dragoncraft",
            GameClass::Shadowcraft => "Shadowcraft",
            GameClass::Bloodcraft => "Bloodcraft",
            GameClass::Havencraft => "Havencraft",
            GameClass::Portalcraft => "Portalcraft",
        }
    }
}

impl std::fmt::Display for GameClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GameClass {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameClass::ALL
            .iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| MatchmakingError::InvalidClassSelection {
                reason: format!("Unknown class: {}", s),
            })
    }
}

/// Two distinct classes, in selection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[GameClass; 2]", into = "[GameClass; 2]")]
pub struct ClassPair {
    first: GameClass,
    second: GameClass,
}

impl ClassPair {
    pub fn new(first: GameClass, second: GameClass) -> Result<Self, MatchmakingError> {
        if first == second {
            return Err(MatchmakingError::InvalidClassSelection {
                reason: format!("Classes must be distinct, got {} twice", first),
            });
        }
        Ok(Self { first, second })
    }

    pub fn first(&self) -> GameClass {
        self.first
    }

    pub fn second(&self) -> GameClass {
        self.second
    }

    pub fn contains(&self, class: GameClass) -> bool {
        self.first == class || self.second == class
    }
}

impl TryFrom<[GameClass; 2]> for ClassPair {
    type Error = MatchmakingError;

    fn try_from(value: [GameClass; 2]) -> Result<Self, Self::Error> {
        ClassPair::new(value[0], value[1])
    }
}

impl From<ClassPair> for [GameClass; 2] {
    fn from(pair: ClassPair) -> Self {
        [pair.first, pair.second]
    }
}

impl std::fmt::Display for ClassPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.first, self.second)
    }
}

/// A registered player and their running season stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub display_name: String,
    /// In-game account id, unique across users
    pub game_id: String,
    pub rating: f64,
    /// Rating frozen by a mid-season stay
    pub stayed_rating: Option<f64>,
    pub trust_points: i32,
    pub stay_flag: bool,
    pub total_matches: u32,
    pub win_streak: u32,
    pub max_win_streak: u32,
    pub win_count: u32,
    pub loss_count: u32,
    pub latest_season_matched: bool,
    pub cancelled_matches_count: u32,
    pub classes: Option<ClassPair>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a freshly registered user
    pub fn new(user_id: UserId, display_name: String, game_id: String, rating: f64) -> Self {
        Self {
            user_id,
            display_name,
            game_id,
            rating,
            stayed_rating: None,
            trust_points: 100,
            stay_flag: false,
            total_matches: 0,
            win_streak: 0,
            max_win_streak: 0,
            win_count: 0,
            loss_count: 0,
            latest_season_matched: false,
            cancelled_matches_count: 0,
            classes: None,
            created_at: Utc::now(),
        }
    }

    /// Rating used for ranking: the higher of live and stayed rating
    pub fn effective_rating(&self) -> f64 {
        match self.stayed_rating {
            Some(stayed) => self.rating.max(stayed),
            None => self.rating,
        }
    }

    /// Zero counters and streaks
    pub fn reset_running_stats(&mut self) {
        self.total_matches = 0;
        self.win_streak = 0;
        self.max_win_streak = 0;
        self.win_count = 0;
        self.loss_count = 0;
    }
}

/// A ranked season; at most one is open at a time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Season {
    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }
}

/// Per (user, season) snapshot written at stay or season close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSeasonRecord {
    pub user_id: UserId,
    pub season_id: SeasonId,
    pub rating: f64,
    pub rank: Option<u32>,
    pub win_count: u32,
    pub loss_count: u32,
    pub total_matches: u32,
    pub win_streak: u32,
    pub max_win_streak: u32,
}

impl UserSeasonRecord {
    /// Snapshot the user's live stats
    pub fn snapshot(user: &User, season_id: SeasonId, rating: f64, rank: Option<u32>) -> Self {
        Self {
            user_id: user.user_id.clone(),
            season_id,
            rating,
            rank,
            win_count: user.win_count,
            loss_count: user.loss_count,
            total_matches: user.total_matches,
            win_streak: user.win_streak,
            max_win_streak: user.max_win_streak,
        }
    }
}

/// Immutable record of a completed match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchHistoryRecord {
    pub id: HistoryId,
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

impl MatchHistoryRecord {
    pub fn involves(&self, user_id: &str) -> bool {
        self.player1 == user_id || self.player2 == user_id
    }

    /// Class pair the given participant played with
    pub fn classes_of(&self, user_id: &str) -> Option<ClassPair> {
        if self.player1 == user_id {
            self.player1_classes
        } else if self.player2 == user_id {
            self.player2_classes
        } else {
            None
        }
    }
}

/// Filters for match history queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub user_id: Option<UserId>,
    pub season_name: Option<String>,
    /// Only matches where the filtered user (or anyone, if no user) played this class
    pub class: Option<GameClass>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &MatchHistoryRecord) -> bool {
        if let Some(user_id) = &self.user_id {
            if !record.involves(user_id) {
                return false;
            }
        }
        if let Some(season) = &self.season_name {
            if record.season_name.as_deref() != Some(season.as_str()) {
                return false;
            }
        }
        if let Some(class) = self.class {
            let played = match &self.user_id {
                Some(user_id) => record
                    .classes_of(user_id)
                    .map(|pair| pair.contains(class))
                    .unwrap_or(false),
                None => [record.player1_classes, record.player2_classes]
                    .iter()
                    .flatten()
                    .any(|pair| pair.contains(class)),
            };
            if !played {
                return false;
            }
        }
        true
    }
}

/// Who a command came from, used to address ephemeral replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: UserId,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
