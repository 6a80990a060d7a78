//! Season open/close and stay checkpoints

pub mod lifecycle;
pub mod roster;

pub use lifecycle::{competition_ranks, SeasonCloseReport, SeasonLifecycle};
pub use roster::RosterLock;
