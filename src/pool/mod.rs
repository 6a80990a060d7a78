//! Waiting pool of users awaiting an opponent

pub mod waiting;

pub use waiting::{WaitingEntry, WaitingPool};
