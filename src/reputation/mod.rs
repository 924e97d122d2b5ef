//! Reputation updater - derives rating and trust from the review set.
//!
//! Always a full recomputation over the reviews a user has received, never
//! an incremental mutation, so the stored values cannot drift.

/// Weight of the rating component in the trust score.
const RATING_WEIGHT: f64 = 0.7;
/// Weight of the completion-volume component in the trust score.
const VOLUME_WEIGHT: f64 = 0.3;
/// Completed-task count at which the volume component saturates.
const VOLUME_SATURATION: f64 = 50.0;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Arithmetic mean of all received ratings, or 5.0 for a user with no
/// reviews yet (new users start with a clean slate).
pub fn average_rating(ratings: &[f64]) -> f64 {
    if ratings.is_empty() {
        return 5.0;
    }
    ratings.iter().sum::<f64>() / ratings.len() as f64
}

/// Trust score in [0, 1]: `0.7 * (avg/5) + 0.3 * min(1, completed/50)`.
/// Monotonic in both inputs.
pub fn trust_score(avg_rating: f64, completed_tasks: i64) -> f64 {
    let rating_part = (avg_rating / 5.0).clamp(0.0, 1.0);
    let volume_part = (completed_tasks as f64 / VOLUME_SATURATION).min(1.0);
    round2(RATING_WEIGHT * rating_part + VOLUME_WEIGHT * volume_part)
}

/// Recompute (avg_rating, trust_score) from scratch.
pub fn recompute(ratings: &[f64], completed_tasks: i64) -> (f64, f64) {
    let avg = round2(average_rating(ratings));
    (avg, trust_score(avg, completed_tasks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_of_review_set() {
        assert_eq!(average_rating(&[4.0, 5.0]), 4.5);
        assert_eq!(average_rating(&[]), 5.0);
    }

    #[test]
    fn test_trust_score_formula() {
        // 0.7 * (4.5/5) + 0.3 * min(1, 28/50) = 0.63 + 0.168 = 0.798 -> 0.8
        assert_eq!(trust_score(4.5, 28), 0.8);
        // Saturates at 50 completed tasks.
        assert_eq!(trust_score(5.0, 50), 1.0);
        assert_eq!(trust_score(5.0, 500), 1.0);
        // No completions: volume part contributes nothing.
        assert_eq!(trust_score(5.0, 0), 0.7);
    }

    #[test]
    fn test_trust_monotonic_in_rating() {
        let low = trust_score(2.0, 10);
        let high = trust_score(4.0, 10);
        assert!(high > low);
    }

    #[test]
    fn test_recompute_rounds_to_two_decimals() {
        let (avg, trust) = recompute(&[4.0, 4.0, 5.0], 3);
        assert_eq!(avg, 4.33);
        // 0.7 * (4.33/5) + 0.3 * (3/50) = 0.6062 + 0.018 = 0.6242 -> 0.62
        assert_eq!(trust, 0.62);
    }
}
