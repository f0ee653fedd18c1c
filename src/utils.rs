//! Utility functions for the pickup engine

use crate::types::Participant;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Calculate the absolute difference between two ratings
pub fn rating_difference(rating1: f64, rating2: f64) -> f64 {
    (rating1 - rating2).abs()
}

/// Rating used for balancing, capped by the queue's override when present
pub fn effective_rating(participant: &Participant, cap: Option<f64>) -> f64 {
    match cap {
        Some(cap) => participant.rating.rating.min(cap),
        None => participant.rating.rating,
    }
}

/// Default team name for a zero-based team index ("A", "B", ... "Z", "AA", ...)
pub fn team_name(index: usize) -> String {
    let mut name = String::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        name.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerRating;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_match_id();
        let id2 = generate_match_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_rating_difference() {
        assert_eq!(rating_difference(1500.0, 1400.0), 100.0);
        assert_eq!(rating_difference(1400.0, 1500.0), 100.0);
        assert_eq!(rating_difference(1500.0, 1500.0), 0.0);
    }

    #[test]
    fn test_effective_rating_cap() {
        let participant = Participant {
            id: "p".to_string(),
            display_name: "p".to_string(),
            rating: PlayerRating {
                rating: 2100.0,
                uncertainty: 100.0,
            },
            joined_at: current_timestamp(),
            captain_role: false,
        };
        assert_eq!(effective_rating(&participant, None), 2100.0);
        assert_eq!(effective_rating(&participant, Some(1800.0)), 1800.0);
    }

    #[test]
    fn test_team_names() {
        assert_eq!(team_name(0), "A");
        assert_eq!(team_name(1), "B");
        assert_eq!(team_name(25), "Z");
        assert_eq!(team_name(26), "AA");
    }
}
