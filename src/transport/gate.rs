//! Bounded, retrying access to the transport

use crate::config::TransportSettings;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::transport::{Notice, SessionHandle, Transport, TransportError, TransportResult};
use crate::types::{RequestContext, UserId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Extra wait added on top of a platform retry-after hint
const RATE_LIMIT_PADDING: Duration = Duration::from_secs(1);

/// Global throttle in front of the transport
///
/// At most `max_in_flight` calls run at once. Rate-limited calls wait for the
/// platform's hint, other retryable failures back off exponentially, and after
/// `max_attempts` the call fails with [`MatchmakingError::TransportFailed`].
pub struct TransportGate {
    transport: Arc<dyn Transport>,
    permits: Arc<Semaphore>,
    settings: TransportSettings,
    metrics: Arc<MetricsCollector>,
}

impl TransportGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: TransportSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            transport,
            permits: Arc::new(Semaphore::new(settings.max_in_flight)),
            settings,
            metrics,
        }
    }

    /// Calls currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.settings
            .max_in_flight
            .saturating_sub(self.permits.available_permits())
    }

    pub async fn create_isolated_session(
        &self,
        name: &str,
        participants: &[UserId],
    ) -> Result<SessionHandle> {
        self.call("create_isolated_session", || {
            self.transport.create_isolated_session(name, participants)
        })
        .await
    }

    pub async fn send_to_session(&self, handle: &SessionHandle, notice: &Notice) -> Result<()> {
        self.call("send_to_session", || {
            self.transport.send_to_session(handle, notice)
        })
        .await
    }

    pub async fn send_ephemeral_reply(
        &self,
        context: &RequestContext,
        notice: &Notice,
    ) -> Result<()> {
        self.call("send_ephemeral_reply", || {
            self.transport.send_ephemeral_reply(context, notice)
        })
        .await
    }

    pub async fn grant_role(&self, user_id: &UserId, role: &str) -> Result<()> {
        self.call("grant_role", || self.transport.grant_role(user_id, role))
            .await
    }

    pub async fn revoke_role(&self, user_id: &UserId, role: &str) -> Result<()> {
        self.call("revoke_role", || self.transport.revoke_role(user_id, role))
            .await
    }

    pub async fn delete_session(&self, handle: &SessionHandle) -> Result<()> {
        self.call("delete_session", || self.transport.delete_session(handle))
            .await
    }

    pub async fn alert_staff(&self, notice: &Notice) -> Result<()> {
        self.call("alert_staff", || self.transport.alert_staff(notice))
            .await
    }

    /// Run one transport operation under the gate's permit and retry policy
    async fn call<T, F, Fut>(&self, operation: &'static str, attempt_call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let timer = self.metrics.start_timer();
        let mut attempt = 0;
        let mut backoff = self.settings.initial_backoff();

        loop {
            attempt += 1;

            let outcome = {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    MatchmakingError::InternalError {
                        message: "Transport gate closed".to_string(),
                    }
                })?;
                attempt_call().await
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            "Transport call succeeded after retry - operation: '{}', attempts: {}",
                            operation, attempt
                        );
                    }
                    self.metrics
                        .record_transport_call(operation, true, timer.elapsed());
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.settings.max_attempts {
                error!(
                    "Transport call gave up - operation: '{}', attempts: {}, error: {}",
                    operation, attempt, err
                );
                self.metrics
                    .record_transport_call(operation, false, timer.stop());
                return Err(MatchmakingError::TransportFailed {
                    operation: operation.to_string(),
                    attempts: attempt,
                    message: err.to_string(),
                }
                .into());
            }

            let (delay, reason) = match &err {
                TransportError::RateLimited { retry_after } => (
                    retry_after.unwrap_or_else(|| self.settings.default_retry_after())
                        + RATE_LIMIT_PADDING,
                    "rate_limited",
                ),
                _ => {
                    let delay = backoff;
                    backoff = (backoff * 2).min(self.settings.max_backoff());
                    (delay, "unavailable")
                }
            };

            warn!(
                "Transport call attempt {} failed - operation: '{}', error: {}. Retrying in {:?}",
                attempt, operation, err, delay
            );
            self.metrics.record_transport_retry(operation, reason);
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, ErrorKind};
    use crate::transport::MockTransport;
    use futures::future::join_all;

    fn create_test_gate(transport: Arc<MockTransport>) -> TransportGate {
        TransportGate::new(
            transport,
            TransportSettings::default(),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_is_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next(
            "grant_role",
            vec![
                TransportError::RateLimited {
                    retry_after: Some(Duration::from_secs(2)),
                },
                TransportError::RateLimited { retry_after: None },
            ],
        );
        let gate = create_test_gate(transport.clone());

        let started = tokio::time::Instant::now();
        gate.grant_role(&"alice".to_string(), "in-match")
            .await
            .unwrap();

        // 2s + 1s padding, then default 5s + 1s padding
        assert!(started.elapsed() >= Duration::from_secs(9));
        assert!(transport.has_role("alice", "in-match"));
        assert_eq!(transport.failed_attempts("grant_role"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let transport = Arc::new(MockTransport::new());
        let failures = (0..10)
            .map(|_| TransportError::Unavailable {
                message: "gateway down".to_string(),
            })
            .collect();
        transport.fail_next("delete_session", failures);
        let gate = create_test_gate(transport.clone());

        let handle = SessionHandle {
            id: "s1".to_string(),
            name: "a_vs_b".to_string(),
        };
        let err = gate.delete_session(&handle).await.unwrap_err();

        assert_eq!(classify(&err), ErrorKind::ExternalFatal);
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::TransportFailed { attempts: 5, .. })
        ));
        assert_eq!(transport.failed_attempts("delete_session"), 5);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next(
            "alert_staff",
            vec![TransportError::Rejected {
                message: "missing channel".to_string(),
            }],
        );
        let gate = create_test_gate(transport.clone());

        assert!(gate.alert_staff(&Notice::ResultsMismatch).await.is_err());
        assert_eq!(transport.failed_attempts("alert_staff"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_calls_are_bounded() {
        let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(100)));
        let gate = Arc::new(create_test_gate(transport.clone()));

        let calls = (0..20).map(|i| {
            let gate = gate.clone();
            async move {
                gate.grant_role(&format!("user-{}", i), "in-match").await
            }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert!(transport.max_observed_in_flight() <= 5);
        assert_eq!(gate.in_flight(), 0);
    }
}
