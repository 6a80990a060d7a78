//! Active sessions keyed by id
//!
//! The registry lock only guards the map; each session carries its own lock so
//! submissions to different sessions never contend.

use crate::error::{MatchmakingError, Result};
use crate::session::state::MatchSession;
use crate::types::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub type SharedSession = Arc<Mutex<MatchSession>>;

/// Lock a single session, mapping poisoning to an internal error
pub fn lock_session(session: &SharedSession) -> Result<MutexGuard<'_, MatchSession>> {
    session.lock().map_err(|_| {
        MatchmakingError::InternalError {
            message: "Failed to acquire session lock".to_string(),
        }
        .into()
    })
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: MatchSession) -> Result<SharedSession> {
        let id = session.id();
        let shared = Arc::new(Mutex::new(session));
        let mut sessions = self.sessions.write().map_err(|_| MatchmakingError::InternalError {
            message: "Failed to acquire session registry write lock".to_string(),
        })?;
        if sessions.contains_key(&id) {
            return Err(MatchmakingError::InvariantViolation {
                message: format!("Session id registered twice: {}", id),
            }
            .into());
        }
        sessions.insert(id, shared.clone());
        Ok(shared)
    }

    pub fn get(&self, id: SessionId) -> Result<SharedSession> {
        let sessions = self.sessions.read().map_err(|_| MatchmakingError::InternalError {
            message: "Failed to acquire session registry read lock".to_string(),
        })?;
        sessions.get(&id).cloned().ok_or_else(|| {
            MatchmakingError::SessionNotFound {
                session_id: id.to_string(),
            }
            .into()
        })
    }

    /// Remove a session; `None` if it was already gone
    pub fn remove(&self, id: SessionId) -> Result<Option<SharedSession>> {
        let mut sessions = self.sessions.write().map_err(|_| MatchmakingError::InternalError {
            message: "Failed to acquire session registry write lock".to_string(),
        })?;
        Ok(sessions.remove(&id))
    }

    /// Session the user currently plays in, if any
    pub fn find_by_user(&self, user_id: &str) -> Result<Option<SessionId>> {
        let sessions = self.sessions.read().map_err(|_| MatchmakingError::InternalError {
            message: "Failed to acquire session registry read lock".to_string(),
        })?;
        for (id, session) in sessions.iter() {
            let session = lock_session(session)?;
            if session.view().opponent_of(user_id).is_some() {
                return Ok(Some(*id));
            }
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every session, returning them for cleanup
    pub fn drain(&self) -> Result<Vec<SharedSession>> {
        let mut sessions = self.sessions.write().map_err(|_| MatchmakingError::InternalError {
            message: "Failed to acquire session registry write lock".to_string(),
        })?;
        Ok(sessions.drain().map(|(_, session)| session).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::SessionView;
    use crate::transport::SessionHandle;
    use chrono::Utc;
    use uuid::Uuid;

    fn create_test_session(p1: &str, p2: &str) -> MatchSession {
        MatchSession::new(SessionView {
            id: Uuid::new_v4(),
            player1: p1.to_string(),
            player2: p2.to_string(),
            player1_classes: None,
            player2_classes: None,
            handle: SessionHandle {
                id: format!("{}-{}", p1, p2),
                name: format!("{}_vs_{}", p1, p2),
            },
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_lookup_by_id_and_user() {
        let registry = SessionRegistry::new();
        let session = create_test_session("alice", "bob");
        let id = session.id();
        registry.insert(session).unwrap();

        assert!(registry.get(id).is_ok());
        assert_eq!(registry.find_by_user("bob").unwrap(), Some(id));
        assert_eq!(registry.find_by_user("carol").unwrap(), None);

        assert!(registry.remove(id).unwrap().is_some());
        assert!(registry.remove(id).unwrap().is_none());
        assert!(registry.get(id).is_err());
        assert!(registry.is_empty());
    }
}
