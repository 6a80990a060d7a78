//! Service layer: operations, command dispatch, wiring and health

pub mod app;
pub mod commands;
pub mod engine;
pub mod health;

pub use app::{AppState, ServiceError};
pub use commands::{Command, CommandReply};
pub use engine::MatchService;
pub use health::{HealthCheck, HealthContext, HealthStatus};
