//! Metrics collection using Prometheus
//!
//! Metric groups mirror the engine's components: service, waiting pool,
//! match sessions and outbound transport calls.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the ladder service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    pool_metrics: PoolMetrics,
    match_metrics: MatchMetrics,
    transport_metrics: TransportMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Commands handled, by command and status
    pub commands_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Waiting pool metrics
#[derive(Clone)]
pub struct PoolMetrics {
    /// Users currently waiting
    pub players_waiting: IntGauge,

    /// Admission attempts by status
    pub admissions_total: IntCounterVec,

    /// Entries removed by the expiry timer
    pub expirations_total: IntCounter,

    /// Time spent in the pool before pairing
    pub wait_time_seconds: Histogram,
}

/// Match session metrics
#[derive(Clone)]
pub struct MatchMetrics {
    pub active_sessions: IntGauge,

    pub matches_created_total: IntCounter,

    /// Resolutions by kind (agreed, timeout, admin)
    pub resolutions_total: IntCounterVec,

    /// Disagreement resets
    pub disagreements_total: IntCounter,

    /// Cancellations by outcome (accepted, escalated, admin, dispute)
    pub cancellations_total: IntCounterVec,

    /// Absolute rating delta applied per player
    pub rating_delta: Histogram,
}

/// Outbound transport metrics
#[derive(Clone)]
pub struct TransportMetrics {
    /// Calls by operation and final status
    pub calls_total: IntCounterVec,

    /// Retries by operation and reason
    pub retries_total: IntCounterVec,

    /// Call duration including retries
    pub call_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let pool_metrics = PoolMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let transport_metrics = TransportMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            pool_metrics,
            match_metrics,
            transport_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn pool(&self) -> &PoolMetrics {
        &self.pool_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn transport(&self) -> &TransportMetrics {
        &self.transport_metrics
    }

    /// Record a handled command
    pub fn record_command(&self, command: &str, status: &str) {
        self.service_metrics
            .commands_total
            .with_label_values(&[command, status])
            .inc();
    }

    /// Record an admission attempt
    pub fn record_admission(&self, status: &str) {
        self.pool_metrics
            .admissions_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn record_pool_expiration(&self) {
        self.pool_metrics.expirations_total.inc();
    }

    pub fn set_players_waiting(&self, count: usize) {
        self.pool_metrics.players_waiting.set(count as i64);
    }

    /// Record a new pairing and how long its users waited
    pub fn record_match_created(&self, waits: &[Duration]) {
        self.match_metrics.matches_created_total.inc();
        for wait in waits {
            self.pool_metrics
                .wait_time_seconds
                .observe(wait.as_secs_f64());
        }
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.match_metrics.active_sessions.set(count as i64);
    }

    /// Record a committed result and its deltas
    pub fn record_resolution(&self, kind: &str, deltas: &[f64]) {
        self.match_metrics
            .resolutions_total
            .with_label_values(&[kind])
            .inc();
        for delta in deltas {
            self.match_metrics.rating_delta.observe(delta.abs());
        }
    }

    pub fn record_disagreement(&self) {
        self.match_metrics.disagreements_total.inc();
    }

    pub fn record_cancellation(&self, outcome: &str) {
        self.match_metrics
            .cancellations_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a finished transport call
    pub fn record_transport_call(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.transport_metrics
            .calls_total
            .with_label_values(&[operation, status])
            .inc();

        self.transport_metrics
            .call_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    pub fn record_transport_retry(&self, operation: &str, reason: &str) {
        self.transport_metrics
            .retries_total
            .with_label_values(&[operation, reason])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("ladder_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new("ladder_room_commands_total", "Commands handled"),
            &["command", "status"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let health_status = IntGauge::new(
            "ladder_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("ladder_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            commands_total,
            health_status,
            component_health,
        })
    }
}

impl PoolMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_waiting =
            IntGauge::new("ladder_room_players_waiting", "Users in the waiting pool")?;
        registry.register(Box::new(players_waiting.clone()))?;

        let admissions_total = IntCounterVec::new(
            Opts::new("ladder_room_admissions_total", "Admission attempts"),
            &["status"],
        )?;
        registry.register(Box::new(admissions_total.clone()))?;

        let expirations_total = IntCounter::new(
            "ladder_room_pool_expirations_total",
            "Pool entries removed unmatched",
        )?;
        registry.register(Box::new(expirations_total.clone()))?;

        let wait_time_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ladder_room_pool_wait_time_seconds",
                "Time waited before pairing",
            )
            .buckets(vec![1.0, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0]),
        )?;
        registry.register(Box::new(wait_time_seconds.clone()))?;

        Ok(Self {
            players_waiting,
            admissions_total,
            expirations_total,
            wait_time_seconds,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_sessions =
            IntGauge::new("ladder_room_active_sessions", "Match sessions in progress")?;
        registry.register(Box::new(active_sessions.clone()))?;

        let matches_created_total =
            IntCounter::new("ladder_room_matches_created_total", "Pairings made")?;
        registry.register(Box::new(matches_created_total.clone()))?;

        let resolutions_total = IntCounterVec::new(
            Opts::new("ladder_room_resolutions_total", "Committed match results"),
            &["kind"],
        )?;
        registry.register(Box::new(resolutions_total.clone()))?;

        let disagreements_total = IntCounter::new(
            "ladder_room_disagreements_total",
            "Result disagreement resets",
        )?;
        registry.register(Box::new(disagreements_total.clone()))?;

        let cancellations_total = IntCounterVec::new(
            Opts::new("ladder_room_cancellations_total", "Sessions ended without a result"),
            &["outcome"],
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let rating_delta = Histogram::with_opts(
            HistogramOpts::new("ladder_room_rating_delta", "Absolute rating delta per player")
                .buckets(vec![5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0]),
        )?;
        registry.register(Box::new(rating_delta.clone()))?;

        Ok(Self {
            active_sessions,
            matches_created_total,
            resolutions_total,
            disagreements_total,
            cancellations_total,
            rating_delta,
        })
    }
}

impl TransportMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let calls_total = IntCounterVec::new(
            Opts::new("ladder_room_transport_calls_total", "Transport calls"),
            &["operation", "status"],
        )?;
        registry.register(Box::new(calls_total.clone()))?;

        let retries_total = IntCounterVec::new(
            Opts::new("ladder_room_transport_retries_total", "Transport call retries"),
            &["operation", "reason"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let call_duration = HistogramVec::new(
            HistogramOpts::new(
                "ladder_room_transport_call_duration_seconds",
                "Transport call duration including retries",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
            &["operation"],
        )?;
        registry.register(Box::new(call_duration.clone()))?;

        Ok(Self {
            calls_total,
            retries_total,
            call_duration,
        })
    }
}
