//! Greedy pairing over a rating-ordered snapshot
//!
//! First fit, not a global optimum: for each candidate in ascending rating
//! order the earliest later candidate inside the window is taken.

use crate::pool::WaitingEntry;
use crate::types::UserId;
use crate::utils::ratings_within_tolerance;
use std::collections::HashMap;

/// Anything the matcher can pair
pub trait Rated {
    fn user_id(&self) -> &str;
    fn rating(&self) -> f64;
}

impl Rated for WaitingEntry {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn rating(&self) -> f64 {
        self.rating
    }
}

/// Last opponent per user; entries are overwritten, never expired
#[derive(Debug, Clone, Default)]
pub struct OpponentMemory {
    last_opponent: HashMap<UserId, UserId>,
}

impl OpponentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether either user last played the other
    pub fn is_repeat(&self, a: &str, b: &str) -> bool {
        self.last_opponent.get(a).map(String::as_str) == Some(b)
            || self.last_opponent.get(b).map(String::as_str) == Some(a)
    }

    pub fn record(&mut self, a: &str, b: &str) {
        self.last_opponent.insert(a.to_string(), b.to_string());
        self.last_opponent.insert(b.to_string(), a.to_string());
    }

    pub fn last_opponent(&self, user_id: &str) -> Option<&UserId> {
        self.last_opponent.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.last_opponent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_opponent.is_empty()
    }
}

/// Index pairs `(i, j)`, `i < j`, each candidate used at most once
pub fn find_pairs<T: Rated>(
    candidates: &[T],
    memory: &OpponentMemory,
    max_rating_difference: f64,
) -> Vec<(usize, usize)> {
    let mut consumed = vec![false; candidates.len()];
    let mut pairs = Vec::new();

    for i in 0..candidates.len() {
        if consumed[i] {
            continue;
        }
        for j in (i + 1)..candidates.len() {
            if consumed[j] {
                continue;
            }
            let (a, b) = (&candidates[i], &candidates[j]);
            if a.user_id() == b.user_id() || memory.is_repeat(a.user_id(), b.user_id()) {
                continue;
            }
            if ratings_within_tolerance(a.rating(), b.rating(), max_rating_difference) {
                consumed[i] = true;
                consumed[j] = true;
                pairs.push((i, j));
                break;
            }
        }
    }

    pairs
}
