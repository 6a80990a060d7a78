//! Health checks over the running engine's components

use crate::amqp::AmqpConnection;
use crate::pool::WaitingPool;
use crate::session::SessionRegistry;
use crate::transport::TransportGate;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value: 2 healthy, 1 degraded, 0 unhealthy
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Handles the health endpoints read from
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub is_running: Arc<RwLock<bool>>,
    pub pool: WaitingPool,
    pub registry: Arc<SessionRegistry>,
    pub gate: Arc<TransportGate>,
    pub transport_limit: usize,
    /// `None` when notices stay in-process
    pub amqp: Option<Arc<AmqpConnection>>,
    pub started_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub players_waiting: usize,
    pub active_sessions: usize,
    pub users_in_match: usize,
    pub transport_in_flight: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Run every component check
    pub async fn check(context: &HealthContext) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(context).await,
            Self::check_waiting_pool(context),
            Self::check_transport(context),
            Self::check_amqp(context),
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        Ok(HealthCheck {
            status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_stats(context),
        })
    }

    pub async fn liveness_check(context: &HealthContext) -> HealthStatus {
        if *context.is_running.read().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Running, pool reachable and broker (if any) connected
    pub async fn readiness_check(context: &HealthContext) -> HealthStatus {
        if !*context.is_running.read().await {
            return HealthStatus::Unhealthy;
        }
        Self::check_waiting_pool(context)
            .status
            .worst(Self::check_amqp(context).status)
    }

    async fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();
        let (status, message) = if *context.is_running.read().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };
        component("service_running", status, message, start)
    }

    fn check_waiting_pool(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();
        let (status, message) = match context.pool.snapshot() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
        };
        component("waiting_pool", status, message, start)
    }

    /// Degraded while every transport permit is taken
    fn check_transport(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();
        let in_flight = context.gate.in_flight();
        let (status, message) = if in_flight >= context.transport_limit {
            (
                HealthStatus::Degraded,
                Some(format!("{} transport calls in flight", in_flight)),
            )
        } else {
            (HealthStatus::Healthy, None)
        };
        component("transport", status, message, start)
    }

    fn check_amqp(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();
        let (status, message) = match &context.amqp {
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            ),
            None => (
                HealthStatus::Healthy,
                Some("Broker disabled, in-process transport".to_string()),
            ),
        };
        component("amqp_connection", status, message, start)
    }

    fn gather_stats(context: &HealthContext) -> ServiceStats {
        ServiceStats {
            players_waiting: context.pool.len(),
            active_sessions: context.registry.len(),
            users_in_match: context.pool.in_match_count(),
            transport_in_flight: context.gate.in_flight(),
            uptime_seconds: context.started_at.elapsed().as_secs(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

fn component(
    name: &str,
    status: HealthStatus,
    message: Option<String>,
    start: Instant,
) -> ComponentCheck {
    ComponentCheck {
        name: name.to_string(),
        status,
        message,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
