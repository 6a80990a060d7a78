use crate::error::{MatchmakingError, Result};
use crate::season::RosterLock;
use crate::storage::{SeasonClose, StayCommit, Storage};
use crate::types::{Season, User, UserSeasonRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Summary of a closed season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonCloseReport {
    pub season: Season,
    pub ranked_users: usize,
    pub reset_users: usize,
}

/// Opens and closes seasons, and takes mid-season stay checkpoints
pub struct SeasonLifecycle {
    storage: Arc<dyn Storage>,
    roster: Arc<RosterLock>,
    initial_rating: f64,
    trust_points_cap: i32,
}

impl SeasonLifecycle {
    pub fn new(
        storage: Arc<dyn Storage>,
        roster: Arc<RosterLock>,
        initial_rating: f64,
        trust_points_cap: i32,
    ) -> Self {
        Self {
            storage,
            roster,
            initial_rating,
            trust_points_cap,
        }
    }

    pub async fn open_season(&self, name: &str) -> Result<Season> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Season name cannot be empty".to_string(),
            }
            .into());
        }
        if let Some(open) = self.storage.find_open_season().await? {
            return Err(MatchmakingError::SeasonAlreadyOpen { name: open.name }.into());
        }

        let season = self.storage.create_season(name, Utc::now()).await?;
        info!("Season opened - id: {}, name: '{}'", season.id, season.name);
        Ok(season)
    }

    /// Stamp the end date, aggregate season records and reset every user
    ///
    /// Runs with the roster held exclusively; in-flight match commits finish
    /// first and land in the closing season.
    pub async fn close_season(&self) -> Result<SeasonCloseReport> {
        let _roster = self.roster.exclusive().await;
        let season = self
            .storage
            .find_open_season()
            .await?
            .ok_or(MatchmakingError::NoOpenSeason)?;

        let users = self.storage.list_users().await?;

        let mut ranked: Vec<&User> = users
            .iter()
            .filter(|user| user.latest_season_matched || user.stay_flag)
            .collect();
        ranked.sort_by(|a, b| b.effective_rating().total_cmp(&a.effective_rating()));
        let ratings: Vec<f64> = ranked.iter().map(|user| user.effective_rating()).collect();
        let ranks = competition_ranks(&ratings);

        let mut records = Vec::with_capacity(ranked.len());
        for (user, rank) in ranked.iter().zip(ranks) {
            records.push(self.season_record(user, &season, rank).await?);
        }

        let reset: Vec<User> = users.iter().map(|user| self.reset_for_new_season(user)).collect();
        let report_counts = (records.len(), reset.len());

        let closed = self
            .storage
            .close_season(SeasonClose {
                season_id: season.id,
                ended_at: Utc::now(),
                records,
                users: reset,
            })
            .await?;

        info!(
            "Season closed - id: {}, name: '{}', ranked_users: {}, reset_users: {}",
            closed.id, closed.name, report_counts.0, report_counts.1
        );

        Ok(SeasonCloseReport {
            season: closed,
            ranked_users: report_counts.0,
            reset_users: report_counts.1,
        })
    }

    /// Freeze the user's current stats and restart them from the baseline rating
    ///
    /// An existing season record for the user is left untouched. Returns the
    /// updated user.
    pub async fn stay(&self, user_id: &str) -> Result<User> {
        let _roster = self.roster.exclusive().await;
        let season = self
            .storage
            .find_open_season()
            .await?
            .ok_or(MatchmakingError::NoOpenSeason)?;
        let mut user = self
            .storage
            .find_user(user_id)
            .await?
            .ok_or_else(|| MatchmakingError::UserNotFound {
                user_id: user_id.to_string(),
            })?;
        if user.stay_flag {
            return Err(MatchmakingError::AlreadyStayed {
                user_id: user_id.to_string(),
            }
            .into());
        }

        let record = UserSeasonRecord::snapshot(&user, season.id, user.rating, None);
        user.stayed_rating = Some(user.rating);
        user.rating = self.initial_rating;
        user.reset_running_stats();
        user.stay_flag = true;

        let inserted = self
            .storage
            .commit_stay(StayCommit {
                user: user.clone(),
                record,
            })
            .await?;

        info!(
            "User stayed - user_id: '{}', season: '{}', stayed_rating: {:.1}, record_written: {}",
            user.user_id,
            season.name,
            user.stayed_rating.unwrap_or(self.initial_rating),
            inserted
        );
        Ok(user)
    }

    async fn season_record(
        &self,
        user: &User,
        season: &Season,
        rank: u32,
    ) -> Result<UserSeasonRecord> {
        let stayed = match (user.stay_flag, user.stayed_rating) {
            (true, Some(stayed)) => stayed,
            _ => {
                return Ok(UserSeasonRecord::snapshot(
                    user,
                    season.id,
                    user.effective_rating(),
                    Some(rank),
                ))
            }
        };

        if user.rating > stayed {
            debug!(
                "Stayer improved after checkpoint - user_id: '{}', stayed: {:.1}, live: {:.1}",
                user.user_id, stayed, user.rating
            );
            return Ok(UserSeasonRecord::snapshot(user, season.id, user.rating, Some(rank)));
        }

        let existing = self
            .storage
            .find_user_season_record(&user.user_id, season.id)
            .await?;
        Ok(match existing {
            Some(mut record) => {
                record.rank = Some(rank);
                record
            }
            None => {
                let mut record = UserSeasonRecord::snapshot(user, season.id, stayed, Some(rank));
                record.win_count = 0;
                record.loss_count = 0;
                record.total_matches = 0;
                record.win_streak = 0;
                record.max_win_streak = 0;
                record
            }
        })
    }

    fn reset_for_new_season(&self, user: &User) -> User {
        let mut reset = user.clone();
        reset.rating = self.initial_rating;
        reset.stayed_rating = None;
        reset.stay_flag = false;
        reset.latest_season_matched = false;
        reset.reset_running_stats();
        if reset.trust_points < self.trust_points_cap {
            reset.trust_points += 1;
        }
        reset
    }
}

/// Competition ranks ("1224") for ratings sorted in descending order
pub fn competition_ranks(sorted_ratings: &[f64]) -> Vec<u32> {
    let mut ranks: Vec<u32> = Vec::with_capacity(sorted_ratings.len());
    for (index, rating) in sorted_ratings.iter().enumerate() {
        let rank = match index {
            0 => 1,
            _ if sorted_ratings[index - 1] == *rating => ranks[index - 1],
            _ => index as u32 + 1,
        };
        ranks.push(rank);
    }
    ranks
}
