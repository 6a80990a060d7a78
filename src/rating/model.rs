//! Rating delta model for 1v1 best-of-three matches
//!
//! A win is worth a fixed base amount, adjusted by a term proportional to the
//! rating gap: the favored player gains less for a win and loses more for a loss.

use crate::config::RatingSettings;
use serde::{Deserialize, Serialize};

/// Trait for computing rating deltas from a match outcome
pub trait RatingModel: Send + Sync {
    /// Delta for one player given both ratings and both game-win counts
    fn compute_delta(
        &self,
        player_rating: f64,
        opponent_rating: f64,
        player_wins: u8,
        opponent_wins: u8,
    ) -> f64;

    /// Rating assigned to new users and after resets
    fn initial_rating(&self) -> f64;
}

/// Default model: `base ± increment_factor * |diff|`
#[derive(Debug, Clone)]
pub struct StandardRatingModel {
    settings: RatingSettings,
}

impl StandardRatingModel {
    pub fn new(settings: RatingSettings) -> Self {
        Self { settings }
    }
}

impl Default for StandardRatingModel {
    fn default() -> Self {
        Self::new(RatingSettings::default())
    }
}

impl RatingModel for StandardRatingModel {
    fn compute_delta(
        &self,
        player_rating: f64,
        opponent_rating: f64,
        player_wins: u8,
        opponent_wins: u8,
    ) -> f64 {
        let base = self.settings.base_delta;
        let increment = self.settings.increment_factor * (player_rating - opponent_rating).abs();
        let won = player_wins > opponent_wins;

        if player_rating > opponent_rating {
            if won {
                base - increment
            } else {
                -(base + increment)
            }
        } else if won {
            base + increment
        } else {
            -(base - increment)
        }
    }

    fn initial_rating(&self) -> f64 {
        self.settings.initial_rating
    }
}

/// Deltas for both sides of a match, computed from pre-match ratings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchDeltas {
    pub player1: f64,
    pub player2: f64,
}

impl MatchDeltas {
    /// Whether player1 is the winning side (the higher delta wins)
    pub fn player1_won(&self) -> bool {
        self.player1 > self.player2
    }
}

/// Compute both deltas with role-swapped arguments
pub fn compute_match_deltas(
    model: &dyn RatingModel,
    player1_rating: f64,
    player2_rating: f64,
    player1_wins: u8,
    player2_wins: u8,
) -> MatchDeltas {
    MatchDeltas {
        player1: model.compute_delta(player1_rating, player2_rating, player1_wins, player2_wins),
        player2: model.compute_delta(player2_rating, player1_rating, player2_wins, player1_wins),
    }
}

/// Before/after view of one user's rating, used in notices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
    pub user_id: String,
    pub before: f64,
    pub after: f64,
    pub delta: f64,
}

impl RatingChange {
    pub fn new(user_id: impl Into<String>, before: f64, delta: f64) -> Self {
        Self {
            user_id: user_id.into(),
            before,
            after: before + delta,
            delta,
        }
    }
}
