//! Statistical validation of scraped data before it is persisted.
//!
//! Both validators are pure over their inputs; persistence and flagging are
//! orchestrated by the core so the checks stay trivially testable.

pub mod odds;
pub mod score;

pub use odds::{AnomalyResult, OddsAnomalyDetector, OddsCheckConfig, OddsUpdate, Severity};
pub use score::{ScoreValidation, ScoreValidator, SportLimits, count_transitions, limits_for};
