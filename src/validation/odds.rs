//! Odds anomaly detection.
//!
//! A scraped odds tuple is checked against absolute bounds, its own internal
//! consistency, and the previous snapshot. Severity only escalates within an
//! evaluation; `Critical` means the update must not be applied.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::storage::OddsRecord;

/// Decimal odds below this are impossible by definition of the format.
pub const MIN_DECIMAL_ODDS: f64 = 1.01;

/// How bad an anomaly is. Ordering matters: escalation picks the max.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the market an odds value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Home => "home",
            Outcome::Draw => "draw",
            Outcome::Away => "away",
        }
    }
}

/// A freshly scraped odds tuple. Two-way markets leave `draw` unset.
#[derive(Debug, Clone)]
pub struct OddsUpdate {
    pub home: f64,
    pub draw: Option<f64>,
    pub away: f64,
    pub source: String,
}

impl OddsUpdate {
    pub fn outcomes(&self) -> Vec<(Outcome, f64)> {
        let mut values = vec![(Outcome::Home, self.home)];
        if let Some(draw) = self.draw {
            values.push((Outcome::Draw, draw));
        }
        values.push((Outcome::Away, self.away));
        values
    }
}

fn record_outcomes(record: &OddsRecord) -> Vec<(Outcome, f64)> {
    let mut values = vec![(Outcome::Home, record.home)];
    if let Some(draw) = record.draw {
        values.push((Outcome::Draw, draw));
    }
    values.push((Outcome::Away, record.away));
    values
}

/// Structured evaluation result. Never an error: bad input maps to the
/// safest severity instead of a throw.
#[derive(Debug, Clone)]
pub struct AnomalyResult {
    pub is_anomalous: bool,
    pub reasons: Vec<String>,
    pub severity: Option<Severity>,
}

impl AnomalyResult {
    fn clean() -> Self {
        Self {
            is_anomalous: false,
            reasons: Vec::new(),
            severity: None,
        }
    }

    /// Append a reason and escalate; severity never downgrades.
    fn record(&mut self, severity: Severity, reason: String) {
        self.is_anomalous = true;
        self.severity = Some(match self.severity {
            Some(current) => current.max(severity),
            None => severity,
        });
        self.reasons.push(reason);
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Some(Severity::Critical)
    }
}

/// Thresholds for the anomaly checks.
#[derive(Debug, Clone)]
pub struct OddsCheckConfig {
    pub max_reasonable_odds: f64,
    /// Implied-probability sums below this indicate corrupted data.
    pub min_implied_sum: f64,
    /// Age under which the previous snapshot counts as recent.
    pub recent_window: Duration,
    /// Relative move against a recent snapshot that is considered rapid.
    pub max_recent_move: f64,
    /// Spread under which all outcomes are suspiciously similar.
    pub tight_spread: f64,
    /// Price multiple on the old favourite that makes a flip suspicious.
    pub flip_swing: f64,
    /// Minimum relative change worth writing to history.
    pub history_min_change: f64,
}

impl Default for OddsCheckConfig {
    fn default() -> Self {
        Self {
            max_reasonable_odds: 50.0,
            min_implied_sum: 0.5,
            recent_window: Duration::from_secs(5 * 60),
            max_recent_move: 0.5,
            tight_spread: 0.15,
            flip_swing: 2.0,
            history_min_change: 0.05,
        }
    }
}

/// Validates odds updates against the previous snapshot.
#[derive(Debug, Clone, Default)]
pub struct OddsAnomalyDetector {
    config: OddsCheckConfig,
}

impl OddsAnomalyDetector {
    pub fn new(config: OddsCheckConfig) -> Self {
        Self { config }
    }

    /// Run every check against the update. Each check may append a reason
    /// and escalate the severity.
    pub fn evaluate(&self, update: &OddsUpdate, previous: Option<&OddsRecord>) -> AnomalyResult {
        let mut result = AnomalyResult::clean();
        let outcomes = update.outcomes();

        // Absolute bounds per outcome.
        for (outcome, odds) in &outcomes {
            if !odds.is_finite() || *odds < MIN_DECIMAL_ODDS {
                result.record(
                    Severity::Critical,
                    format!("{} odds {:.3} below minimum {MIN_DECIMAL_ODDS}", outcome.as_str(), odds),
                );
            } else if *odds > self.config.max_reasonable_odds {
                result.record(
                    Severity::High,
                    format!(
                        "{} odds {:.2} above plausible maximum {:.1}",
                        outcome.as_str(),
                        odds,
                        self.config.max_reasonable_odds
                    ),
                );
            }
        }

        // Implied probability sum: bookmakers price above 100%; far below it
        // the data is arbitrage-shaped garbage.
        let implied_sum: f64 = outcomes
            .iter()
            .filter(|(_, odds)| *odds >= MIN_DECIMAL_ODDS)
            .map(|(_, odds)| 1.0 / odds)
            .sum();
        if implied_sum > 0.0 && implied_sum < self.config.min_implied_sum {
            result.record(
                Severity::Critical,
                format!(
                    "implied probability sum {:.3} below {:.2}",
                    implied_sum, self.config.min_implied_sum
                ),
            );
        }

        // Rapid move against a recent snapshot, matched per outcome.
        if let Some(prev) = previous {
            let age = (Utc::now() - prev.recorded_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age < self.config.recent_window {
                let prev_outcomes = record_outcomes(prev);
                for (outcome, new) in &outcomes {
                    let Some(old) = price_of(&prev_outcomes, *outcome) else {
                        continue;
                    };
                    if old > f64::EPSILON {
                        let change = (new - old).abs() / old;
                        if change > self.config.max_recent_move {
                            result.record(
                                Severity::High,
                                format!(
                                    "{} odds moved {:.0}% within {}s",
                                    outcome.as_str(),
                                    change * 100.0,
                                    age.as_secs()
                                ),
                            );
                        }
                    }
                }
            }
        }

        // Spread too tight across all outcomes: classic scraper glitch where
        // one cell value gets duplicated across the row.
        if outcomes.len() >= 2 {
            let min = outcomes.iter().map(|(_, o)| *o).fold(f64::INFINITY, f64::min);
            let max = outcomes.iter().map(|(_, o)| *o).fold(0.0, f64::max);
            if min >= MIN_DECIMAL_ODDS && max / min - 1.0 <= self.config.tight_spread {
                result.record(
                    Severity::High,
                    format!(
                        "all outcomes within {:.0}% of each other ({:.2}..{:.2})",
                        self.config.tight_spread * 100.0,
                        min,
                        max
                    ),
                );
            }
        }

        // Favourite flip with an outsized swing on the old favourite.
        if let Some(prev) = previous {
            let prev_outcomes = record_outcomes(prev);
            if let (Some(prev_fav), Some(new_fav)) =
                (favourite(&prev_outcomes), favourite(&outcomes))
                && prev_fav != new_fav
            {
                let old_price = price_of(&prev_outcomes, prev_fav);
                let new_price = price_of(&outcomes, prev_fav);
                if let (Some(old), Some(new)) = (old_price, new_price)
                    && old > f64::EPSILON
                    && new / old > self.config.flip_swing
                {
                    result.record(
                        Severity::High,
                        format!(
                            "favourite flipped {} -> {} with {:.1}x swing",
                            prev_fav.as_str(),
                            new_fav.as_str(),
                            new / old
                        ),
                    );
                }
            }
        }

        result
    }

    /// Whether the change against the previous snapshot is big enough to be
    /// worth a history row (bounds volume; small jitter is dropped).
    pub fn should_record(&self, update: &OddsUpdate, previous: Option<&OddsRecord>) -> bool {
        let Some(prev) = previous else {
            return true;
        };
        max_relative_change(update, prev) > self.config.history_min_change
    }
}

fn favourite(outcomes: &[(Outcome, f64)]) -> Option<Outcome> {
    outcomes
        .iter()
        .filter(|(_, odds)| odds.is_finite())
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(outcome, _)| *outcome)
}

fn price_of(outcomes: &[(Outcome, f64)], which: Outcome) -> Option<f64> {
    outcomes
        .iter()
        .find(|(outcome, _)| *outcome == which)
        .map(|(_, odds)| *odds)
}

fn max_relative_change(update: &OddsUpdate, prev: &OddsRecord) -> f64 {
    let prev_outcomes = record_outcomes(prev);
    update
        .outcomes()
        .iter()
        .filter_map(|(outcome, new)| {
            price_of(&prev_outcomes, *outcome)
                .filter(|old| *old > f64::EPSILON)
                .map(|old| (new - old).abs() / old)
        })
        .fold(0.0, f64::max)
}
