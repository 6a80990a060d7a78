//! Prometheus metrics and the health/metrics HTTP server

pub mod collector;
pub mod health;

pub use collector::{
    MatchMetrics, MetricsCollector, MetricsTimer, PoolMetrics, ServiceMetrics, TransportMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
