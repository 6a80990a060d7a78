//! Rating-ordered waiting pool with per-entry expiry
//!
//! The pool also owns the set of users holding an active-match marker, so the
//! "queued or in a match, never both" rule is checked under a single lock.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::transport::{Notice, TransportGate};
use crate::types::{RequestContext, UserId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A user waiting for an opponent
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub user_id: UserId,
    /// Rating at admission time
    pub rating: f64,
    pub enqueued_at: DateTime<Utc>,
    /// Where replies for this admission go
    pub context: RequestContext,
    seq: u64,
    waiting_since: Instant,
}

impl WaitingEntry {
    /// Time spent in the pool so far
    pub fn waited(&self) -> Duration {
        self.waiting_since.elapsed()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    /// Ascending by (rating, admission order)
    entries: Vec<WaitingEntry>,
    expiry_timers: HashMap<UserId, AbortHandle>,
    in_match: HashSet<UserId>,
    next_seq: u64,
}

impl PoolState {
    fn position(&self, user_id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.user_id == user_id)
    }

    fn remove(&mut self, user_id: &str) -> Option<WaitingEntry> {
        let index = self.position(user_id)?;
        if let Some(timer) = self.expiry_timers.remove(user_id) {
            timer.abort();
        }
        Some(self.entries.remove(index))
    }
}

/// Concurrent waiting pool
#[derive(Clone)]
pub struct WaitingPool {
    state: Arc<Mutex<PoolState>>,
    gate: Arc<TransportGate>,
    metrics: Arc<MetricsCollector>,
    timeout: Duration,
}

impl WaitingPool {
    pub fn new(gate: Arc<TransportGate>, metrics: Arc<MetricsCollector>, timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState::default())),
            gate,
            metrics,
            timeout,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire waiting pool lock".to_string(),
            }
            .into()
        })
    }

    /// Admit a user at the given rating and arm their expiry timer
    pub fn enqueue(&self, context: RequestContext, rating: f64) -> Result<DateTime<Utc>> {
        let user_id = context.user_id.clone();
        let mut state = self.lock()?;

        if state.in_match.contains(&user_id) {
            return Err(MatchmakingError::AlreadyInMatch { user_id }.into());
        }
        if state.position(&user_id).is_some() {
            return Err(MatchmakingError::AlreadyQueued { user_id }.into());
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let entry = WaitingEntry {
            user_id: user_id.clone(),
            rating,
            enqueued_at: Utc::now(),
            context,
            seq,
            waiting_since: Instant::now(),
        };
        let enqueued_at = entry.enqueued_at;

        let index = state
            .entries
            .partition_point(|existing| existing.rating <= rating);
        state.entries.insert(index, entry);

        let pool = self.clone();
        let expiring_user = user_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(pool.timeout).await;
            pool.expire(&expiring_user, seq).await;
        });
        state.expiry_timers.insert(user_id.clone(), timer.abort_handle());

        let waiting = state.entries.len();
        drop(state);

        self.metrics.set_players_waiting(waiting);
        info!(
            "User queued - user_id: '{}', rating: {:.1}, waiting: {}",
            user_id, rating, waiting
        );
        Ok(enqueued_at)
    }

    /// Remove the entry admitted with `seq`, if it is still waiting
    async fn expire(&self, user_id: &UserId, seq: u64) {
        let expired = match self.lock() {
            Ok(mut state) => match state.position(user_id) {
                Some(index) if state.entries[index].seq == seq => {
                    state.expiry_timers.remove(user_id);
                    let entry = state.entries.remove(index);
                    self.metrics.set_players_waiting(state.entries.len());
                    Some(entry)
                }
                _ => None,
            },
            Err(e) => {
                warn!("Pool expiry skipped - user_id: '{}', error: {}", user_id, e);
                None
            }
        };

        let Some(entry) = expired else {
            debug!("Stale pool expiry ignored - user_id: '{}'", user_id);
            return;
        };

        self.metrics.record_pool_expiration();
        info!(
            "Pool entry expired - user_id: '{}', waited: {:?}",
            entry.user_id,
            entry.waited()
        );
        if let Err(e) = self
            .gate
            .send_ephemeral_reply(&entry.context, &Notice::NoOpponentFound)
            .await
        {
            warn!(
                "Failed to deliver expiry notice - user_id: '{}', error: {}",
                entry.user_id, e
            );
        }
    }

    /// Idempotent removal; returns the entry if it was still waiting
    pub fn dequeue_if_present(&self, user_id: &str) -> Result<Option<WaitingEntry>> {
        let mut state = self.lock()?;
        let removed = state.remove(user_id);
        let waiting = state.entries.len();
        drop(state);

        if removed.is_some() {
            self.metrics.set_players_waiting(waiting);
            debug!("User dequeued - user_id: '{}'", user_id);
        }
        Ok(removed)
    }

    /// Ordered copy of the pool, safe to iterate without the lock
    pub fn snapshot(&self) -> Result<Vec<WaitingEntry>> {
        Ok(self.lock()?.entries.clone())
    }

    /// Atomically consume both entries and mark both users as in a match
    ///
    /// Returns `None` without changing anything if either user already left.
    pub fn take_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<Option<(WaitingEntry, WaitingEntry)>> {
        let mut state = self.lock()?;
        if first == second || state.position(first).is_none() || state.position(second).is_none()
        {
            return Ok(None);
        }

        let (Some(a), Some(b)) = (state.remove(first), state.remove(second)) else {
            return Err(MatchmakingError::InvariantViolation {
                message: format!("Pool entries vanished under lock: {}, {}", first, second),
            }
            .into());
        };
        state.in_match.insert(a.user_id.clone());
        state.in_match.insert(b.user_id.clone());
        let waiting = state.entries.len();
        drop(state);

        self.metrics.set_players_waiting(waiting);
        Ok(Some((a, b)))
    }

    /// Clear a user's active-match marker; returns whether it was set
    pub fn release_match_marker(&self, user_id: &str) -> Result<bool> {
        let released = self.lock()?.in_match.remove(user_id);
        if released {
            debug!("Match marker released - user_id: '{}'", user_id);
        }
        Ok(released)
    }

    pub fn is_in_match(&self, user_id: &str) -> Result<bool> {
        Ok(self.lock()?.in_match.contains(user_id))
    }

    pub fn is_queued(&self, user_id: &str) -> Result<bool> {
        Ok(self.lock()?.position(user_id).is_some())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Users currently holding a match marker
    pub fn in_match_count(&self) -> usize {
        self.lock().map(|state| state.in_match.len()).unwrap_or(0)
    }

    /// Abort every expiry timer and drop all waiting entries
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.lock()?;
        for (_, timer) in state.expiry_timers.drain() {
            timer.abort();
        }
        let dropped = state.entries.len();
        state.entries.clear();
        drop(state);

        self.metrics.set_players_waiting(0);
        info!("Waiting pool shut down - dropped_entries: {}", dropped);
        Ok(())
    }
}
