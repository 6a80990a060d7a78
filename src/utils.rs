//! Utility functions for the matchmaking service

use crate::types::SessionId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique session ID
pub fn generate_session_id() -> SessionId {
    Uuid::new_v4()
}

/// Generate a correlation id for outbound messages
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Calculate the absolute difference between two ratings
pub fn rating_difference(rating1: f64, rating2: f64) -> f64 {
    (rating1 - rating2).abs()
}

/// Check if two ratings are within the given tolerance
pub fn ratings_within_tolerance(rating1: f64, rating2: f64, tolerance: f64) -> bool {
    rating_difference(rating1, rating2) <= tolerance
}

/// Name of the external session created for a pairing
pub fn session_display_name(player1: &str, player2: &str) -> String {
    format!("{}_vs_{}", player1, player2)
}

/// Render a rating delta with an explicit sign
pub fn format_delta(delta: f64) -> String {
    if delta >= 0.0 {
        format!("+{:.0}", delta)
    } else {
        format!("{:.0}", delta)
    }
}
