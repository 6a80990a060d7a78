//! Rating model for ranked matches
//!
//! Pure functions only; persistence of ratings lives in the storage layer.

pub mod model;

pub use model::{compute_match_deltas, MatchDeltas, RatingChange, RatingModel, StandardRatingModel};
