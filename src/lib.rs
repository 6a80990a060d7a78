//! Ladder Room - ranked 1v1 matchmaking and match lifecycle
//!
//! Users queue for a match, the matcher pairs them by rating, and each pair
//! plays a best-of-three inside an isolated session. Results are agreed on,
//! rated and recorded in the season's history. Everything outside the engine
//! (chat gateway, roles, private channels) is reached through [`transport`].

pub mod amqp;
pub mod config;
pub mod error;
pub mod history;
pub mod matcher;
pub mod metrics;
pub mod pool;
pub mod rating;
pub mod season;
pub mod service;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matcher::Matcher;
pub use pool::WaitingPool;
pub use service::{AppState, Command, CommandReply, MatchService};
pub use session::SessionCoordinator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
