//! Periodic pairing of waiting users

pub mod algorithm;
pub mod runner;

pub use algorithm::{find_pairs, OpponentMemory, Rated};
pub use runner::{Matcher, TickReport};
