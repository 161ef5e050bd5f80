//! Live-score validation against sport-specific physical limits.
//!
//! Invalid updates are rejected but still land in the append-only history
//! for audit. Large single-update jumps only warn: they usually mean a
//! missed poll, not bad data.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use crate::storage::ScoreRecord;

/// Physical limits for one sport.
#[derive(Debug, Clone, Copy)]
pub struct SportLimits {
    pub max_score: i32,
    pub max_differential: i32,
    /// Period-based sports (tennis, volleyball) reset the visible score, so
    /// a decrease is legitimate there.
    pub allows_decrease: bool,
    pub period_based: bool,
    /// Single-update jump above this logs a warning (not invalidating).
    pub jump_warning: i32,
}

static SPORT_LIMITS: Lazy<HashMap<&'static str, SportLimits>> = Lazy::new(|| {
    HashMap::from([
        (
            "football",
            SportLimits {
                max_score: 15,
                max_differential: 12,
                allows_decrease: false,
                period_based: false,
                jump_warning: 3,
            },
        ),
        (
            "basketball",
            SportLimits {
                max_score: 250,
                max_differential: 100,
                allows_decrease: false,
                period_based: false,
                jump_warning: 30,
            },
        ),
        (
            "tennis",
            SportLimits {
                max_score: 7,
                max_differential: 7,
                allows_decrease: true,
                period_based: true,
                jump_warning: 4,
            },
        ),
        (
            "volleyball",
            SportLimits {
                max_score: 35,
                max_differential: 30,
                allows_decrease: true,
                period_based: true,
                jump_warning: 10,
            },
        ),
        (
            "ice_hockey",
            SportLimits {
                max_score: 20,
                max_differential: 15,
                allows_decrease: false,
                period_based: false,
                jump_warning: 4,
            },
        ),
        (
            "american_football",
            SportLimits {
                max_score: 100,
                max_differential: 80,
                allows_decrease: false,
                period_based: false,
                jump_warning: 21,
            },
        ),
        (
            "baseball",
            SportLimits {
                max_score: 30,
                max_differential: 25,
                allows_decrease: false,
                period_based: false,
                jump_warning: 10,
            },
        ),
        (
            "handball",
            SportLimits {
                max_score: 60,
                max_differential: 40,
                allows_decrease: false,
                period_based: false,
                jump_warning: 8,
            },
        ),
    ])
});

/// Lenient fallback for sports the table does not know: wide bounds beat
/// false invalidation of good data.
const DEFAULT_LIMITS: SportLimits = SportLimits {
    max_score: 200,
    max_differential: 150,
    allows_decrease: false,
    period_based: false,
    jump_warning: 50,
};

/// Resolve the limits table entry for a sport name, alias-tolerant.
pub fn limits_for(sport: &str) -> &'static SportLimits {
    let key = match sport.to_lowercase().as_str() {
        "soccer" | "football" => "football",
        "basketball" | "nba" => "basketball",
        "tennis" => "tennis",
        "volleyball" => "volleyball",
        "hockey" | "ice_hockey" | "ice hockey" | "nhl" => "ice_hockey",
        "american_football" | "american football" | "nfl" => "american_football",
        "baseball" | "mlb" => "baseball",
        "handball" => "handball",
        _ => return &DEFAULT_LIMITS,
    };
    SPORT_LIMITS.get(key).unwrap_or(&DEFAULT_LIMITS)
}

/// Structured validation result; never an error.
#[derive(Debug, Clone)]
pub struct ScoreValidation {
    pub valid: bool,
    pub reasons: Vec<String>,
    pub jump_detected: bool,
}

impl ScoreValidation {
    fn passing() -> Self {
        Self {
            valid: true,
            reasons: Vec::new(),
            jump_detected: false,
        }
    }

    fn reject(&mut self, reason: String) {
        self.valid = false;
        self.reasons.push(reason);
    }
}

/// Validates scraped score updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreValidator;

impl ScoreValidator {
    /// Check one update against the sport's limits and the previous score.
    ///
    /// Null scores always pass: the game has not started.
    pub fn validate(
        &self,
        sport: &str,
        new_home: Option<i32>,
        new_away: Option<i32>,
        previous: Option<(i32, i32)>,
    ) -> ScoreValidation {
        let mut result = ScoreValidation::passing();
        let (Some(home), Some(away)) = (new_home, new_away) else {
            return result;
        };
        let limits = limits_for(sport);

        if home < 0 || away < 0 {
            result.reject(format!("negative score {home}-{away}"));
        }
        if home > limits.max_score || away > limits.max_score {
            result.reject(format!(
                "score {home}-{away} above {} maximum {}",
                sport, limits.max_score
            ));
        }
        if (home - away).abs() > limits.max_differential {
            result.reject(format!(
                "differential {} above {} maximum {}",
                (home - away).abs(),
                sport,
                limits.max_differential
            ));
        }

        if let Some((prev_home, prev_away)) = previous {
            if (home < prev_home || away < prev_away) && !limits.allows_decrease {
                result.reject(format!(
                    "score decreased {prev_home}-{prev_away} -> {home}-{away}"
                ));
            }

            let jump = (home - prev_home).max(away - prev_away);
            if result.valid && jump > limits.jump_warning {
                // Probably a catch-up after missed polls; surface but accept.
                log::warn!(
                    "large {} score jump {prev_home}-{prev_away} -> {home}-{away}",
                    sport
                );
                result.jump_detected = true;
            }
        }

        result
    }
}

/// Count score transitions among history rows inside the time window.
///
/// `history` is newest-first as returned by the store. A zero result is the
/// stability gate settlement logic requires before releasing held payouts.
pub fn count_transitions(
    history: &[ScoreRecord],
    window: Duration,
    now: DateTime<Utc>,
) -> usize {
    let horizon = now
        - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(0));
    let mut in_window: Vec<&ScoreRecord> = history
        .iter()
        .filter(|record| record.scraped_at >= horizon)
        .collect();
    in_window.reverse(); // chronological order

    in_window
        .windows(2)
        .filter(|pair| pair[0].home != pair[1].home || pair[0].away != pair[1].away)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ScoreValidator {
        ScoreValidator
    }

    #[test]
    fn null_scores_pass() {
        let result = validator().validate("football", None, None, None);
        assert!(result.valid);
        let result = validator().validate("football", Some(1), None, None);
        assert!(result.valid);
    }

    #[test]
    fn football_decrease_is_invalid() {
        let result = validator().validate("football", Some(0), Some(1), Some((1, 1)));
        assert!(!result.valid);
        assert!(result.reasons[0].contains("decreased"));
    }

    #[test]
    fn tennis_set_reset_is_valid() {
        let result = validator().validate("tennis", Some(0), Some(0), Some((6, 4)));
        assert!(result.valid);
    }

    #[test]
    fn negative_score_is_invalid() {
        let result = validator().validate("football", Some(-1), Some(0), None);
        assert!(!result.valid);
    }

    #[test]
    fn above_sport_maximum_is_invalid() {
        let result = validator().validate("football", Some(19), Some(0), None);
        assert!(!result.valid);
        // Same numbers fine in basketball.
        let result = validator().validate("basketball", Some(19), Some(0), None);
        assert!(result.valid);
    }

    #[test]
    fn excessive_differential_is_invalid() {
        let result = validator().validate("ice_hockey", Some(18), Some(1), None);
        assert!(!result.valid);
        assert!(result.reasons[0].contains("differential"));
    }

    #[test]
    fn jump_warns_but_passes() {
        let result = validator().validate("football", Some(5), Some(0), Some((0, 0)));
        assert!(result.valid);
        assert!(result.jump_detected);
    }

    #[test]
    fn unknown_sport_uses_lenient_default() {
        let result = validator().validate("curling", Some(40), Some(2), None);
        assert!(result.valid);
    }

    #[test]
    fn transition_counting_respects_window() {
        let now = Utc::now();
        let record = |home: i32, age_secs: i64| ScoreRecord {
            event_id: "ev-1".into(),
            home: Some(home),
            away: Some(0),
            period: None,
            minute: None,
            source: "flashscore".into(),
            valid: true,
            scraped_at: now - chrono::Duration::seconds(age_secs),
        };
        // Newest first: 2-0 (10s ago), 2-0 (2min), 1-0 (4min), 0-0 (20min).
        let history = vec![record(2, 10), record(2, 120), record(1, 240), record(0, 1200)];

        // Within 5 minutes: 1-0 -> 2-0 is one transition.
        assert_eq!(
            count_transitions(&history, Duration::from_secs(300), now),
            1
        );
        // Within 1 minute: only the newest row, no transitions.
        assert_eq!(count_transitions(&history, Duration::from_secs(60), now), 0);
        // The full window sees both changes.
        assert_eq!(
            count_transitions(&history, Duration::from_secs(3600), now),
            2
        );
    }
}
