//! In-process transport that records every delivered call
//!
//! Used by tests and by dry runs without a broker.

use crate::transport::{Notice, SessionHandle, Transport, TransportError, TransportResult};
use crate::types::{RequestContext, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// A successfully delivered transport call
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    CreateSession {
        handle: SessionHandle,
        participants: Vec<UserId>,
    },
    SendToSession {
        handle: SessionHandle,
        notice: Notice,
    },
    EphemeralReply {
        user_id: UserId,
        notice: Notice,
    },
    GrantRole {
        user_id: UserId,
        role: String,
    },
    RevokeRole {
        user_id: UserId,
        role: String,
    },
    DeleteSession {
        handle: SessionHandle,
    },
    AlertStaff {
        notice: Notice,
    },
}

/// Mock transport for tests and local runs
#[derive(Debug, Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    roles: Mutex<HashSet<(UserId, String)>>,
    scripted_failures: Mutex<HashMap<String, VecDeque<TransportError>>>,
    failed_attempts: Mutex<HashMap<String, u32>>,
    next_session: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Option<Duration>,
    log_calls: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Log every delivered call at info level
    pub fn with_logging(mut self) -> Self {
        self.log_calls = true;
        self
    }

    /// Make the next calls of `operation` fail with these errors, in order
    pub fn fail_next(&self, operation: &str, errors: Vec<TransportError>) {
        if let Ok(mut failures) = self.scripted_failures.lock() {
            failures
                .entry(operation.to_string())
                .or_default()
                .extend(errors);
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Notices posted into sessions, in delivery order
    pub fn session_notices(&self) -> Vec<Notice> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::SendToSession { notice, .. } => Some(notice),
                _ => None,
            })
            .collect()
    }

    /// Ephemeral replies delivered to one user
    pub fn replies_to(&self, user_id: &str) -> Vec<Notice> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::EphemeralReply { user_id: to, notice } if to == user_id => {
                    Some(notice)
                }
                _ => None,
            })
            .collect()
    }

    pub fn staff_alerts(&self) -> Vec<Notice> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AlertStaff { notice } => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn created_sessions(&self) -> Vec<SessionHandle> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::CreateSession { handle, .. } => Some(handle),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_sessions(&self) -> Vec<SessionHandle> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::DeleteSession { handle } => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// Whether the user currently holds the role
    pub fn has_role(&self, user_id: &str, role: &str) -> bool {
        self.roles
            .lock()
            .map(|roles| roles.contains(&(user_id.to_string(), role.to_string())))
            .unwrap_or(false)
    }

    /// Failed attempts seen for an operation
    pub fn failed_attempts(&self, operation: &str) -> u32 {
        self.failed_attempts
            .lock()
            .map(|attempts| attempts.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Highest number of concurrent calls observed
    pub fn max_observed_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn attempt(&self, operation: &str, call: TransportCall) -> TransportResult<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .scripted_failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.get_mut(operation).and_then(VecDeque::pop_front));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = scripted {
            if let Ok(mut attempts) = self.failed_attempts.lock() {
                *attempts.entry(operation.to_string()).or_insert(0) += 1;
            }
            return Err(err);
        }

        if self.log_calls {
            info!("Transport call delivered - {:?}", call);
        }
        if let Ok(mut roles) = self.roles.lock() {
            match &call {
                TransportCall::GrantRole { user_id, role } => {
                    roles.insert((user_id.clone(), role.clone()));
                }
                TransportCall::RevokeRole { user_id, role } => {
                    roles.remove(&(user_id.clone(), role.clone()));
                }
                _ => {}
            }
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_isolated_session(
        &self,
        name: &str,
        participants: &[UserId],
    ) -> TransportResult<SessionHandle> {
        let number = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = SessionHandle {
            id: format!("mock-session-{}", number),
            name: name.to_string(),
        };
        self.attempt(
            "create_isolated_session",
            TransportCall::CreateSession {
                handle: handle.clone(),
                participants: participants.to_vec(),
            },
        )
        .await?;
        Ok(handle)
    }

    async fn send_to_session(&self, handle: &SessionHandle, notice: &Notice) -> TransportResult<()> {
        self.attempt(
            "send_to_session",
            TransportCall::SendToSession {
                handle: handle.clone(),
                notice: notice.clone(),
            },
        )
        .await
    }

    async fn send_ephemeral_reply(
        &self,
        context: &RequestContext,
        notice: &Notice,
    ) -> TransportResult<()> {
        self.attempt(
            "send_ephemeral_reply",
            TransportCall::EphemeralReply {
                user_id: context.user_id.clone(),
                notice: notice.clone(),
            },
        )
        .await
    }

    async fn grant_role(&self, user_id: &UserId, role: &str) -> TransportResult<()> {
        self.attempt(
            "grant_role",
            TransportCall::GrantRole {
                user_id: user_id.clone(),
                role: role.to_string(),
            },
        )
        .await
    }

    async fn revoke_role(&self, user_id: &UserId, role: &str) -> TransportResult<()> {
        self.attempt(
            "revoke_role",
            TransportCall::RevokeRole {
                user_id: user_id.clone(),
                role: role.to_string(),
            },
        )
        .await
    }

    async fn delete_session(&self, handle: &SessionHandle) -> TransportResult<()> {
        self.attempt(
            "delete_session",
            TransportCall::DeleteSession {
                handle: handle.clone(),
            },
        )
        .await
    }

    async fn alert_staff(&self, notice: &Notice) -> TransportResult<()> {
        self.attempt(
            "alert_staff",
            TransportCall::AlertStaff {
                notice: notice.clone(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roles_are_tracked() {
        let transport = MockTransport::new();
        let alice = "alice".to_string();

        transport.grant_role(&alice, "in-match").await.unwrap();
        assert!(transport.has_role("alice", "in-match"));

        transport.revoke_role(&alice, "in-match").await.unwrap();
        assert!(!transport.has_role("alice", "in-match"));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let transport = MockTransport::new();
        transport.fail_next("alert_staff", vec![TransportError::RateLimited { retry_after: None }]);

        assert!(transport.alert_staff(&Notice::ResultsMismatch).await.is_err());
        assert!(transport.alert_staff(&Notice::ResultsMismatch).await.is_ok());
        assert_eq!(transport.staff_alerts(), vec![Notice::ResultsMismatch]);
        assert_eq!(transport.failed_attempts("alert_staff"), 1);
    }
}
